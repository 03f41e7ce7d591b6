//! Show one stored session.

use std::io::Write;

use anyhow::{Context, Result, bail};
use ft_core::SessionId;
use ft_db::Database;

use super::render;

pub fn run<W: Write>(writer: &mut W, db: &Database, session_id: &str, json: bool) -> Result<()> {
    let session_id = SessionId::new(session_id).context("invalid session id")?;
    let Some(summary) = db.load_summary(&session_id)? else {
        bail!("session {session_id} not found");
    };
    let timeline = db.load_timeline(&session_id)?;

    if json {
        let value = serde_json::json!({
            "summary": summary,
            "timeline": timeline,
        });
        writeln!(writer, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }

    render::summary(writer, &summary)?;
    if timeline.is_empty() {
        writeln!(writer, "No timeline recorded.")?;
    } else {
        let ticks = timeline.iter().map(|s| s.values.len()).max().unwrap_or(0);
        writeln!(
            writer,
            "Timeline: {} series over {ticks} ticks",
            timeline.len()
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use ft_core::{SeriesExport, SeriesKey};
    use insta::assert_snapshot;

    use crate::commands::test_support::handover_summary;

    fn db_with_session() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let summary = handover_summary("morning-ride");
        db.save_summary(&summary).unwrap();
        let series = vec![
            SeriesExport {
                key: "entity:ent-0002:coins".parse::<SeriesKey>().unwrap(),
                values: vec![Some(0.0), Some(0.2), None],
            },
            SeriesExport {
                key: "device:d1:heart_rate".parse::<SeriesKey>().unwrap(),
                values: vec![Some(150.0), None, Some(151.0)],
            },
        ];
        db.save_timeline(&summary.session_id, &series).unwrap();
        db
    }

    #[test]
    fn renders_stored_session() {
        let db = db_with_session();
        let mut output = Vec::new();
        run(&mut output, &db, "morning-ride", false).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Session morning-ride
        Started: 2025-01-15 09:00:00 UTC
        Ended:   2025-01-15 09:01:30 UTC
        Ticks:   90

        ENTITY     PROFILE    DEVICE   STATUS         COINS   TIME
        ent-0001   alan       d1       transferred     6.00   0:30  (to ent-0002)
        ent-0002   bob        d1       dropped        18.00   1:30

        Total coins: 18.00
        Timeline: 2 series over 3 ticks
        ");
    }

    #[test]
    fn json_includes_timeline() {
        let db = db_with_session();
        let mut output = Vec::new();
        run(&mut output, &db, "morning-ride", true).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["summary"]["sessionId"], "morning-ride");
        assert_eq!(value["summary"]["entities"][0]["transferredTo"], "ent-0002");
        assert_eq!(value["timeline"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn unknown_session_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let err = run(&mut Vec::new(), &db, "nope", false).unwrap_err();
        assert_eq!(err.to_string(), "session nope not found");
    }
}
