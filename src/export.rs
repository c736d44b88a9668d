use std::fmt::Write as _;

use crate::matcher::ChangeRecord;

pub const CSV_HEADER: &str = "type,x,y,area,area_change,change_ratio,position_offset,confidence";

/// Renders change records as CSV, one row per record.
///
/// Resize columns are left empty for new and demolished buildings.
pub fn records_to_csv(records: &[ChangeRecord]) -> String {
    let mut out = String::with_capacity(64 * (records.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');
    for record in records {
        let (delta, ratio, offset) = match &record.resize {
            Some(resize) => (
                format!("{:.0}", resize.delta),
                format!("{:.4}", resize.ratio),
                format!("{:.1}", resize.position_offset),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "{},{:.0},{:.0},{:.0},{},{},{},{:.2}",
            record.kind.as_str(),
            record.position.x,
            record.position.y,
            record.area,
            delta,
            ratio,
            offset,
            record.confidence
        );
    }
    out
}
