//! List stored sessions, most recent first.

use std::io::Write;

use anyhow::Result;
use ft_db::Database;
use serde::Serialize;

use super::render::format_time;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRow {
    session_id: String,
    start_time: Option<String>,
    end_time: String,
    tick_count: u64,
    entity_count: usize,
    total_coins: f64,
}

pub fn run<W: Write>(writer: &mut W, db: &Database, json: bool) -> Result<()> {
    let sessions = db.list_sessions()?;

    if json {
        let rows: Vec<SessionRow> = sessions
            .into_iter()
            .map(|record| SessionRow {
                session_id: record.session_id.to_string(),
                start_time: record.start_time.map(|t| t.to_rfc3339()),
                end_time: record.end_time.to_rfc3339(),
                tick_count: record.tick_count,
                entity_count: record.entity_count,
                total_coins: record.total_coins,
            })
            .collect();
        writeln!(writer, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }

    if sessions.is_empty() {
        writeln!(writer, "No sessions recorded.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "{:<36}  {:<23}  {:>8}  {:>8}",
        "SESSION", "ENDED", "ENTITIES", "COINS"
    )?;
    for record in sessions {
        writeln!(
            writer,
            "{:<36}  {:<23}  {:>8}  {:>8.2}",
            record.session_id.as_str(),
            format_time(record.end_time),
            record.entity_count,
            record.total_coins
        )?;
    }
    Ok(())
}
