//! Plain-text rendering shared by the session commands.

use std::fmt::Write as _;
use std::io::{self, Write};

use chrono::{DateTime, Utc};
use ft_core::{SessionSummary, Snapshot, ZoneId};

pub fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Formats milliseconds as `m:ss`.
pub fn format_duration(ms: i64) -> String {
    let seconds = ms.max(0) / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Writes a session summary as a table of every entity.
pub fn summary<W: Write>(writer: &mut W, summary: &SessionSummary) -> io::Result<()> {
    writeln!(writer, "Session {}", summary.session_id)?;
    match summary.start_time {
        Some(start) => writeln!(writer, "Started: {}", format_time(start))?,
        None => writeln!(writer, "Started: no device was assigned")?,
    }
    writeln!(writer, "Ended:   {}", format_time(summary.end_time))?;
    writeln!(writer, "Ticks:   {}", summary.tick_count)?;

    if summary.entities.is_empty() {
        writeln!(writer, "No participants.")?;
        return Ok(());
    }

    writeln!(writer)?;
    writeln!(
        writer,
        "{:<10} {:<10} {:<8} {:<12} {:>7} {:>6}",
        "ENTITY", "PROFILE", "DEVICE", "STATUS", "COINS", "TIME"
    )?;
    for entity in &summary.entities {
        let end = entity.end_time.unwrap_or(summary.end_time);
        let mut row = format!(
            "{:<10} {:<10} {:<8} {:<12} {:>7.2} {:>6}",
            entity.entity_id.as_str(),
            entity.profile_id.as_str(),
            entity.device_id.as_str(),
            entity.status.as_str(),
            entity.coins,
            format_duration((end - entity.start_time).num_milliseconds()),
        );
        if let Some(successor) = &entity.transferred_to {
            let _ = write!(row, "  (to {successor})");
        }
        writeln!(writer, "{row}")?;
    }

    writeln!(writer)?;
    writeln!(writer, "Total coins: {:.2}", summary.total_coins())
}

/// One status line per tick for live output.
pub fn snapshot_line(snapshot: &Snapshot) -> String {
    let mut line = format!(
        "[{}] tick {} {}",
        snapshot.taken_at.format("%H:%M:%S"),
        snapshot.tick_index,
        snapshot.state
    );
    for entry in &snapshot.roster.entries {
        let zone = entry.zone_id.as_ref().map_or("-", ZoneId::as_str);
        let _ = write!(line, " | {} {} {:.2}", entry.display_name, zone, entry.coins);
    }
    let governance = &snapshot.governance;
    let _ = write!(
        line,
        " | policy {} ({}/{})",
        if governance.satisfied { "met" } else { "waiting" },
        governance.actual_count,
        governance.required_count
    );
    if snapshot.rejected > 0 {
        let _ = write!(line, " | {} rejected", snapshot.rejected);
    }
    line
}
