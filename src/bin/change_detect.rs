//! change_detect - compare building detections from two images
//!
//! Reads the detector output for an earlier and a recent image, matches the
//! buildings and prints the change report as JSON. Optionally writes the change
//! list as CSV and records the comparison in the history database.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use building_change::config::ChangeConfig;
use building_change::{
    records_to_csv, ChangeMatcher, ComparisonEntry, DetectionSet, DetectorBackend, HistoryStore,
    ImageSize, ReplayBackend, SqliteHistoryStore,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Detections (JSON) for the earlier image.
    #[arg(long)]
    earlier: PathBuf,
    /// Detections (JSON) for the recent image.
    #[arg(long)]
    recent: PathBuf,
    /// Minimum IOU for two boxes to be the same building.
    #[arg(long)]
    iou_threshold: Option<f64>,
    /// Minimum relative area change to report an extension or shrinkage.
    #[arg(long)]
    area_threshold: Option<f64>,
    /// Ignore match candidates whose centers are this many pixels apart or more.
    #[arg(long)]
    max_center_distance: Option<f64>,
    /// Drop detections below this confidence before matching.
    #[arg(long)]
    confidence_threshold: Option<f32>,
    /// Frame width in pixels (defaults to the size reported by the detector).
    #[arg(long, requires = "height")]
    width: Option<u32>,
    /// Frame height in pixels.
    #[arg(long, requires = "width")]
    height: Option<u32>,
    /// Write the report JSON here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Write the change list as CSV.
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Record the comparison in the history database.
    #[arg(long)]
    save: bool,
    /// History database path (overrides configuration).
    #[arg(long, env = "CHANGE_DB_PATH")]
    db_path: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(
        ui::UiMode::parse(&args.ui),
        std::io::stderr().is_terminal(),
        args.output.is_none() && !std::io::stdout().is_terminal(),
    );

    let mut cfg = ChangeConfig::load()?;
    if let Some(v) = args.iou_threshold {
        cfg.matching.iou_threshold = v;
    }
    if let Some(v) = args.area_threshold {
        cfg.matching.area_change_threshold = v;
    }
    if let Some(v) = args.max_center_distance {
        cfg.matching.max_center_distance = Some(v);
    }
    if let Some(v) = args.confidence_threshold {
        cfg.confidence_threshold = v;
    }
    if let Some(path) = args.db_path {
        cfg.db_path = path;
    }
    cfg.validate()?;

    let matcher = ChangeMatcher::new(cfg.matching)?;
    let requested_frame = args.width.zip(args.height);

    let (earlier, recent) = {
        let _stage = ui.stage("Load detections");
        let earlier = detect_from_file(&args.earlier, requested_frame, cfg.confidence_threshold)?;
        let recent = detect_from_file(&args.recent, requested_frame, cfg.confidence_threshold)?;
        (earlier, recent)
    };
    log::info!(
        "loaded {} earlier and {} recent detections (confidence >= {})",
        earlier.len(),
        recent.len(),
        cfg.confidence_threshold
    );

    let frame = resolve_frame(&earlier, &recent);
    if frame.area() == 0.0 {
        log::warn!("frame size unknown; change rate will be reported as 0");
    }

    let report = {
        let _stage = ui.stage("Match buildings");
        matcher.compare(&earlier, &recent, frame)
    };

    if let Some(path) = &args.csv {
        let _stage = ui.stage("Write CSV");
        std::fs::write(path, records_to_csv(&report.records))
            .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?;
    }

    if args.save {
        let _stage = ui.stage("Save history");
        let entry = ComparisonEntry::from_report(
            &args.earlier.display().to_string(),
            &args.recent.display().to_string(),
            &earlier,
            &recent,
            &report,
        )?;
        // A failed save is logged, not fatal.
        match SqliteHistoryStore::open(&cfg.db_path).and_then(|mut store| store.append(&entry)) {
            Ok(id) => log::info!("comparison saved to {} as #{}", cfg.db_path, id),
            Err(e) => log::warn!("failed to save history: {}", e),
        }
    }

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?;
            eprintln!("report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn detect_from_file(
    path: &Path,
    frame: Option<(u32, u32)>,
    conf_threshold: f32,
) -> Result<DetectionSet> {
    let mut backend = ReplayBackend::from_json_file(path)?;
    let (width, height) = frame.unwrap_or((0, 0));
    let mut set = backend.detect(&[], width, height, conf_threshold)?;
    if frame.is_some() {
        set.frame = Some(ImageSize::new(width, height));
    }
    Ok(set)
}

/// Uses the larger of the two frames on each axis, as both images are
/// compared on a common canvas.
fn resolve_frame(earlier: &DetectionSet, recent: &DetectionSet) -> ImageSize {
    match (earlier.frame, recent.frame) {
        (Some(a), Some(b)) => ImageSize::new(a.width.max(b.width), a.height.max(b.height)),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => ImageSize::default(),
    }
}
