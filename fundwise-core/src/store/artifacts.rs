//! Index of generated report artifacts, one row per `(run_date, symbol, kind)`.
//!
//! Regenerating an artifact updates its row in place, mirroring the
//! overwrite semantics of the files themselves. Kinds a regeneration no
//! longer produces are dropped with [`ArtifactIndex::retain_kinds`].

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::params;
use serde::Serialize;

use super::db::{decode_date, decode_ts, encode_date, encode_ts, Database};
use super::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRecord {
    pub run_date: NaiveDate,
    pub symbol_id: String,
    pub kind: String,
    pub path: String,
    pub checksum: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ArtifactIndex {
    db: Database,
}

impl ArtifactIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn upsert(&self, record: &ArtifactRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO report_artifacts (run_date, symbol_id, kind, path, checksum, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(run_date, symbol_id, kind) DO UPDATE SET
                    path = excluded.path,
                    checksum = excluded.checksum,
                    generated_at = excluded.generated_at",
                params![
                    encode_date(record.run_date),
                    record.symbol_id,
                    record.kind,
                    record.path,
                    record.checksum,
                    encode_ts(record.generated_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Delete rows for `(run_date, symbol_id)` whose kind is not in `keep`.
    /// Returns the number of rows removed.
    pub fn retain_kinds(
        &self,
        run_date: NaiveDate,
        symbol_id: &str,
        keep: &[&str],
    ) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let existing: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT kind FROM report_artifacts WHERE run_date = ?1 AND symbol_id = ?2",
                )?;
                let rows = stmt.query_map(params![encode_date(run_date), symbol_id], |row| row.get(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            let mut removed = 0;
            for kind in existing.iter().filter(|k| !keep.contains(&k.as_str())) {
                removed += tx.execute(
                    "DELETE FROM report_artifacts WHERE run_date = ?1 AND symbol_id = ?2 AND kind = ?3",
                    params![encode_date(run_date), symbol_id, kind],
                )?;
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    pub fn for_run(
        &self,
        run_date: NaiveDate,
        symbol_id: &str,
    ) -> Result<Vec<ArtifactRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_date, symbol_id, kind, path, checksum, generated_at
                 FROM report_artifacts WHERE run_date = ?1 AND symbol_id = ?2 ORDER BY kind",
            )?;
            let rows = stmt.query_map(params![encode_date(run_date), symbol_id], |row| {
                let date: String = row.get(0)?;
                let generated: String = row.get(5)?;
                Ok(ArtifactRecord {
                    run_date: decode_date(&date, 0)?,
                    symbol_id: row.get(1)?,
                    kind: row.get(2)?,
                    path: row.get(3)?,
                    checksum: row.get(4)?,
                    generated_at: decode_ts(&generated, 5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn regeneration_updates_in_place() {
        let index = ArtifactIndex::new(Database::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2026, 2, 27).unwrap();
        let mut rec = ArtifactRecord {
            run_date: date,
            symbol_id: "600519.SH".into(),
            kind: "report.md".into(),
            path: "reports/2026-02-27/600519_SH/report.md".into(),
            checksum: "aaa".into(),
            generated_at: Utc.with_ymd_and_hms(2026, 2, 27, 9, 0, 0).unwrap(),
        };
        index.upsert(&rec).unwrap();
        rec.checksum = "bbb".into();
        index.upsert(&rec).unwrap();

        let rows = index.for_run(date, "600519.SH").unwrap();
        assert_eq!(rows, vec![rec]);
    }

    #[test]
    fn retain_kinds_drops_only_unlisted_rows() {
        let index = ArtifactIndex::new(Database::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2026, 2, 27).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 27, 9, 0, 0).unwrap();
        for (symbol_id, kind) in [("600519.SH", "chart"), ("600519.SH", "report"), ("00700.HK", "chart")] {
            index
                .upsert(&ArtifactRecord {
                    run_date: date,
                    symbol_id: symbol_id.into(),
                    kind: kind.into(),
                    path: format!("reports/{symbol_id}/{kind}"),
                    checksum: "aaa".into(),
                    generated_at: at,
                })
                .unwrap();
        }

        assert_eq!(index.retain_kinds(date, "600519.SH", &["report"]).unwrap(), 1);
        let kinds: Vec<_> = index
            .for_run(date, "600519.SH")
            .unwrap()
            .into_iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds, ["report"]);
        assert_eq!(index.for_run(date, "00700.HK").unwrap().len(), 1);
        assert_eq!(index.retain_kinds(date, "600519.SH", &["report"]).unwrap(), 0);
    }
}
