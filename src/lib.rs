//! Building change detection.
//!
//! Given building detections from an earlier and a recent image of the same
//! area, this crate works out which buildings persist, which are new, which
//! were demolished and which were extended or shrunk.
//!
//! # Module Structure
//!
//! - `geometry`: boxes, points, IOU
//! - `detect`: detection types, tolerant parsing of detector output, detector backends
//! - `matcher`: greedy IOU matching and change classification
//! - `export`: CSV rendering of change records
//! - `storage`: comparison history (SQLite or in-memory)
//! - `config`: file + env configuration
//!
//! Model inference and image decoding stay outside the crate; detections
//! arrive as JSON or through a `DetectorBackend`.

use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod detect;
pub mod export;
pub mod geometry;
pub mod matcher;
pub mod storage;

pub use detect::{Detection, DetectionSet, DetectorBackend, RawDetection, ReplayBackend};
pub use export::records_to_csv;
pub use geometry::{BBox, ImageSize, Point};
pub use matcher::{
    match_detections, AreaChange, ChangeKind, ChangeMatcher, ChangeRecord, ChangeReport,
    ChangeSummary, DominantChange, MatchParams, MatchedPair,
};
pub use storage::{
    ComparisonEntry, HistoryQuery, HistoryRecord, HistoryStats, HistoryStore,
    InMemoryHistoryStore, SqliteHistoryStore,
};

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
