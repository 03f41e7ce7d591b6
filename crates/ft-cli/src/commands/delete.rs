//! Delete a stored session.

use std::io::Write;

use anyhow::{Context, Result, bail};
use ft_core::SessionId;
use ft_db::Database;
use tracing::info;

pub fn run<W: Write>(writer: &mut W, db: &mut Database, session_id: &str) -> Result<()> {
    let session_id = SessionId::new(session_id).context("invalid session id")?;
    if !db.delete_session(&session_id)? {
        bail!("session {session_id} not found");
    }
    info!(session_id = %session_id, "deleted session");
    writeln!(writer, "Deleted session {session_id}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use ft_core::{SeriesExport, SeriesKey};

    use crate::commands::test_support::handover_summary;

    #[test]
    fn removes_summary_and_timeline() {
        let mut db = Database::open_in_memory().unwrap();
        let summary = handover_summary("morning-ride");
        db.save_summary(&summary).unwrap();
        let series = [SeriesExport {
            key: "entity:ent-0002:coins".parse::<SeriesKey>().unwrap(),
            values: vec![Some(0.0), Some(0.2)],
        }];
        db.save_timeline(&summary.session_id, &series).unwrap();

        let mut output = Vec::new();
        run(&mut output, &mut db, "morning-ride").unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Deleted session morning-ride\n"
        );
        assert!(db.load_summary(&summary.session_id).unwrap().is_none());
        assert!(db.load_timeline(&summary.session_id).unwrap().is_empty());
        assert!(db.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn unknown_session_is_an_error() {
        let mut db = Database::open_in_memory().unwrap();
        let err = run(&mut Vec::new(), &mut db, "missing").unwrap_err();
        assert_eq!(err.to_string(), "session missing not found");
    }
}
