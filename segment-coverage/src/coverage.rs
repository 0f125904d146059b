//! Building the per-hour coverage grid.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use segments::{SegmentFile, SegmentKind};

/// Seconds per grid cell.
pub const CELL_SECONDS: i64 = 2;

/// Cells in one hour.
pub const CELLS_PER_HOUR: usize = (3600 / CELL_SECONDS) as usize;

/// Audit state of one 2-second cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cell {
    /// Best segment kind covering any part of this cell.
    pub best: Option<SegmentKind>,
    /// More than one segment overlaps this cell.
    pub duplicated: bool,
}

/// One hour's coverage at 2-second resolution.
pub struct CoverageMap {
    pub hour_start: DateTime<Utc>,
    pub cells: Vec<Cell>,
}

impl CoverageMap {
    pub fn build(hour_start: DateTime<Utc>, listed: &[SegmentFile]) -> Self {
        let mut cells = vec![Cell::default(); CELLS_PER_HOUR];
        let mut overlap_counts = vec![0u32; CELLS_PER_HOUR];

        for segment in listed {
            let rel_start = (segment.start - hour_start).num_milliseconds() as f64 / 1000.0;
            let rel_end = rel_start + segment.duration.as_secs_f64();

            let first_cell = (rel_start / CELL_SECONDS as f64).floor().max(0.0) as usize;
            let last_cell = (rel_end / CELL_SECONDS as f64).ceil() as usize;
            for index in first_cell..last_cell.min(CELLS_PER_HOUR) {
                let cell = &mut cells[index];
                cell.best = Some(match cell.best {
                    Some(existing) if existing.rank() <= segment.kind.rank() => existing,
                    _ => segment.kind,
                });
                overlap_counts[index] += 1;
            }
        }

        for (cell, count) in cells.iter_mut().zip(&overlap_counts) {
            cell.duplicated = *count > 1;
        }

        Self { hour_start, cells }
    }

    /// Fraction of the hour covered by any segment.
    pub fn covered_fraction(&self) -> f64 {
        let covered = self.cells.iter().filter(|c| c.best.is_some()).count();
        covered as f64 / self.cells.len() as f64
    }

    /// End of the audited hour, for labelling.
    pub fn hour_end(&self) -> DateTime<Utc> {
        self.hour_start + ChronoDuration::hours(1)
    }
}
