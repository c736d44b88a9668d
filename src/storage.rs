use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::detect::DetectionSet;
use crate::matcher::{ChangeReport, DominantChange};
use crate::now_s;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Confidence used for a side without detections.
const EMPTY_SIDE_CONFIDENCE: f32 = 0.5;

/// A finished comparison, ready to be stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub earlier_image: String,
    pub recent_image: String,
    pub change_type: DominantChange,
    pub change_area: f64,
    pub confidence: f32,
    /// Serialized `ChangeReport`.
    pub result_json: String,
}

impl ComparisonEntry {
    /// Builds an entry from a report. Confidence is the mean of the lead
    /// detection confidence on each side.
    pub fn from_report(
        earlier_image: &str,
        recent_image: &str,
        earlier: &DetectionSet,
        recent: &DetectionSet,
        report: &ChangeReport,
    ) -> Result<Self> {
        let earlier_conf = earlier.lead_confidence().unwrap_or(EMPTY_SIDE_CONFIDENCE);
        let recent_conf = recent.lead_confidence().unwrap_or(EMPTY_SIDE_CONFIDENCE);
        Ok(Self {
            earlier_image: earlier_image.to_string(),
            recent_image: recent_image.to_string(),
            change_type: report.summary.dominant_change(),
            change_area: report.summary.total_change_area,
            confidence: (earlier_conf + recent_conf) / 2.0,
            result_json: serde_json::to_string(report)?,
        })
    }
}

/// A stored comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub detected_at: i64,
    #[serde(flatten)]
    pub entry: ComparisonEntry,
}

impl HistoryRecord {
    pub fn report(&self) -> Result<ChangeReport> {
        serde_json::from_str(&self.entry.result_json)
            .map_err(|e| anyhow!("history record {} has a corrupt report: {}", self.id, e))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryQuery {
    pub limit: usize,
    pub offset: usize,
    pub change_type: Option<DominantChange>,
    pub min_confidence: Option<f32>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_HISTORY_LIMIT,
            offset: 0,
            change_type: None,
            min_confidence: None,
        }
    }
}

impl HistoryQuery {
    fn accepts(&self, entry: &ComparisonEntry) -> bool {
        self.change_type.map_or(true, |t| t == entry.change_type)
            && self.min_confidence.map_or(true, |c| entry.confidence >= c)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub avg_change_area: f64,
    pub avg_confidence: f64,
}

/// Record store for finished comparisons.
pub trait HistoryStore {
    /// Appends an entry and returns its id.
    fn append(&mut self, entry: &ComparisonEntry) -> Result<i64>;

    /// Lists entries newest first.
    fn list(&mut self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>>;

    fn clear(&mut self) -> Result<()>;

    fn stats(&mut self) -> Result<HistoryStats>;
}

pub struct SqliteHistoryStore {
    conn: Connection,
}

impl SqliteHistoryStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| anyhow!("failed to open history db {}: {}", db_path, e))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS change_detection_history (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              detected_at INTEGER NOT NULL,
              earlier_image TEXT NOT NULL,
              recent_image TEXT NOT NULL,
              change_type TEXT NOT NULL,
              change_area REAL NOT NULL,
              confidence REAL NOT NULL,
              result_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_change_history_detected
              ON change_detection_history(detected_at);
            "#,
        )?;
        Ok(())
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<(HistoryRecord, String)> {
        let change_type: String = row.get(4)?;
        let confidence: f64 = row.get(6)?;
        let record = HistoryRecord {
            id: row.get(0)?,
            detected_at: row.get(1)?,
            entry: ComparisonEntry {
                earlier_image: row.get(2)?,
                recent_image: row.get(3)?,
                change_type: DominantChange::NoChange,
                change_area: row.get(5)?,
                confidence: confidence as f32,
                result_json: row.get(7)?,
            },
        };
        Ok((record, change_type))
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&mut self, entry: &ComparisonEntry) -> Result<i64> {
        let detected_at = now_s()? as i64;
        self.conn.execute(
            r#"
            INSERT INTO change_detection_history(
              detected_at, earlier_image, recent_image, change_type,
              change_area, confidence, result_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                detected_at,
                entry.earlier_image,
                entry.recent_image,
                entry.change_type.as_str(),
                entry.change_area,
                f64::from(entry.confidence),
                entry.result_json
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list(&mut self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        let change_type = query.change_type.map(|t| t.as_str());
        let min_confidence = query.min_confidence.map(f64::from);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, detected_at, earlier_image, recent_image, change_type,
                   change_area, confidence, result_json
            FROM change_detection_history
            WHERE (?1 IS NULL OR change_type = ?1)
              AND (?2 IS NULL OR confidence >= ?2)
            ORDER BY detected_at DESC, id DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                change_type,
                min_confidence,
                query.limit as i64,
                query.offset as i64
            ],
            Self::row_to_record,
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (mut record, change_type) = row?;
            record.entry.change_type = DominantChange::parse(&change_type)
                .map_err(|e| anyhow!("corrupt history row {}: {}", record.id, e))?;
            out.push(record);
        }
        Ok(out)
    }

    fn clear(&mut self) -> Result<()> {
        self.conn
            .execute("DELETE FROM change_detection_history", [])?;
        Ok(())
    }

    fn stats(&mut self) -> Result<HistoryStats> {
        let row = self
            .conn
            .query_row(
                "SELECT COUNT(*), AVG(change_area), AVG(confidence) FROM change_detection_history",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                    ))
                },
            )
            .optional()?;
        let (total, avg_area, avg_confidence) = row.unwrap_or((0, None, None));
        Ok(HistoryStats {
            total: total as usize,
            avg_change_area: avg_area.unwrap_or(0.0),
            avg_confidence: avg_confidence.unwrap_or(0.0),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryHistoryStore {
    records: Vec<HistoryRecord>,
    next_id: i64,
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(&mut self, entry: &ComparisonEntry) -> Result<i64> {
        self.next_id += 1;
        self.records.push(HistoryRecord {
            id: self.next_id,
            detected_at: now_s()? as i64,
            entry: entry.clone(),
        });
        Ok(self.next_id)
    }

    fn list(&mut self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .records
            .iter()
            .rev()
            .filter(|record| query.accepts(&record.entry))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn clear(&mut self) -> Result<()> {
        self.records.clear();
        Ok(())
    }

    fn stats(&mut self) -> Result<HistoryStats> {
        let total = self.records.len();
        if total == 0 {
            return Ok(HistoryStats::default());
        }
        let n = total as f64;
        Ok(HistoryStats {
            total,
            avg_change_area: self.records.iter().map(|r| r.entry.change_area).sum::<f64>() / n,
            avg_confidence: self
                .records
                .iter()
                .map(|r| f64::from(r.entry.confidence))
                .sum::<f64>()
                / n,
        })
    }
}
