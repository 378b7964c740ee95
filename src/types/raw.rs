use crate::types::location::GridCell;
use chrono::{DateTime, Utc};

/// One value of the sampled grid cell at a UTC instant, already in the stored unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl RawSample {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self { time, value }
    }
}

/// All samples of one grid cell, ordered by time.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSeries {
    pub cell: GridCell,
    pub samples: Vec<RawSample>,
}

impl GridSeries {
    pub fn new(cell: GridCell, mut samples: Vec<RawSample>) -> Self {
        samples.sort_by_key(|s| s.time);
        Self { cell, samples }
    }
}

/// A decoded payload: every grid cell it contained for one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDataset {
    /// Short name of the variable in the payload (`t2m`, `tp`, `ssrd`).
    pub variable: String,
    pub series: Vec<GridSeries>,
}
