//! Status command for showing configuration and stored sessions.

use std::io::Write;

use anyhow::Result;
use ft_db::Database;

use super::render::format_time;
use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    writeln!(writer, "Fitness tracker status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;

    let policy = &config.session.policy;
    writeln!(
        writer,
        "Policy: {} at {} or above",
        policy.quorum, policy.min_zone
    )?;

    if config.profiles.is_empty() {
        writeln!(writer, "No profiles configured.")?;
    } else {
        writeln!(writer, "Profiles:")?;
        for profile in &config.profiles {
            match &profile.zones {
                Some(zones) => writeln!(
                    writer,
                    "- {} ({}): {} zones",
                    profile.id,
                    profile.display_name,
                    zones.bands.len()
                )?,
                None => writeln!(
                    writer,
                    "- {} ({}): no zones configured",
                    profile.id, profile.display_name
                )?,
            }
        }
    }

    let sessions = db.list_sessions()?;
    match sessions.first() {
        None => writeln!(writer, "No sessions recorded.")?,
        Some(last) => {
            writeln!(writer, "Sessions: {}", sessions.len())?;
            writeln!(
                writer,
                "Last session: {} ended {} ({:.2} coins)",
                last.session_id,
                format_time(last.end_time),
                last.total_coins
            )?;
        }
    }

    Ok(())
}
