use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

pub fn last_run(conn: &Connection, job: &str) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT last_run FROM job_runs WHERE job = ?1",
            params![job],
            |row| row.get(0),
        )
        .optional()?;

    // An unreadable timestamp just means the job runs again
    Ok(value
        .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

pub fn record_run(conn: &Connection, job: &str, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO job_runs (job, last_run) VALUES (?1, ?2)
         ON CONFLICT(job) DO UPDATE SET last_run = excluded.last_run",
        params![job, at.to_rfc3339()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn test_record_and_read() {
        let conn = open_in_memory().unwrap();
        assert!(last_run(&conn, "update_check").unwrap().is_none());

        let at = Utc::now();
        record_run(&conn, "update_check", at).unwrap();
        let stored = last_run(&conn, "update_check").unwrap().unwrap();
        assert_eq!(stored.timestamp(), at.timestamp());

        let later = at + chrono::Duration::hours(1);
        record_run(&conn, "update_check", later).unwrap();
        assert_eq!(
            last_run(&conn, "update_check").unwrap().unwrap().timestamp(),
            later.timestamp()
        );
    }
}
