//! Geographic locations and their resolved time zone.

use crate::types::error::LocationError;
use chrono_tz::Tz;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tzf_rs::DefaultFinder;

static TZ_FINDER: OnceLock<DefaultFinder> = OnceLock::new();

fn tz_finder() -> &'static DefaultFinder {
    TZ_FINDER.get_or_init(DefaultFinder::new)
}

/// A reanalysis grid cell centre, in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub lat: f64,
    pub lon: f64,
}

impl GridCell {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether two cells refer to the same grid point (grid spacing is 0.25°).
    pub fn same_cell(&self, other: &GridCell) -> bool {
        (self.lat - other.lat).abs() < 1e-6 && (self.lon - other.lon).abs() < 1e-6
    }
}

/// A named point on the globe with its IANA time zone.
///
/// The time zone is resolved at construction, either from the coordinates or from an
/// explicit override, so any `Location` can be used to build requests.
///
/// # Examples
///
/// ```
/// use era5_climate::Location;
///
/// let cambridge = Location::with_timezone("Cambridge, UK", 52.21, 0.12, "Europe/London").unwrap();
/// assert_eq!(cambridge.timezone_name(), "Europe/London");
/// assert!(cambridge.grid_cell().is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    timezone: Tz,
    grid_cell: Option<GridCell>,
}

/// Result of recording the sampled grid cell on a [`Location`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridCellUpdate {
    /// The cell was not known before and is now set.
    Recorded,
    /// The same cell was already recorded.
    Unchanged,
    /// A different cell was already recorded; the stored one was kept.
    Conflict { kept: GridCell, reported: GridCell },
}

impl Location {
    /// Creates a location, deriving its time zone from the coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::InvalidCoordinates`] for out-of-range coordinates and
    /// [`LocationError::UnresolvableTimezone`] if no zone covers the point.
    pub fn new(name: impl Into<String>, lat: f64, lon: f64) -> Result<Self, LocationError> {
        let name = name.into();
        validate_coordinates(&name, lat, lon)?;
        let tz_name = tz_finder().get_tz_name(lon, lat);
        if tz_name.is_empty() {
            return Err(LocationError::UnresolvableTimezone { name, lat, lon });
        }
        let timezone = parse_tz(tz_name)?;
        debug!("Auto-detected timezone for {}: {}", name, tz_name);
        Ok(Self {
            name,
            lat,
            lon,
            timezone,
            grid_cell: None,
        })
    }

    /// Creates a location with an explicit IANA time zone.
    pub fn with_timezone(
        name: impl Into<String>,
        lat: f64,
        lon: f64,
        timezone: &str,
    ) -> Result<Self, LocationError> {
        let name = name.into();
        validate_coordinates(&name, lat, lon)?;
        Ok(Self {
            name,
            lat,
            lon,
            timezone: parse_tz(timezone)?,
            grid_cell: None,
        })
    }

    /// Same as [`Location::with_timezone`] when `timezone` is given, [`Location::new`] otherwise.
    pub fn resolve(
        name: impl Into<String>,
        lat: f64,
        lon: f64,
        timezone: Option<&str>,
    ) -> Result<Self, LocationError> {
        match timezone {
            Some(tz) => Self::with_timezone(name, lat, lon, tz),
            None => Self::new(name, lat, lon),
        }
    }

    pub fn tz(&self) -> Tz {
        self.timezone
    }

    pub fn timezone_name(&self) -> &'static str {
        self.timezone.name()
    }

    pub fn grid_cell(&self) -> Option<GridCell> {
        self.grid_cell
    }

    /// Records the grid cell that was actually sampled. Once set, the cell never changes.
    pub fn record_grid_cell(&mut self, cell: GridCell) -> GridCellUpdate {
        match self.grid_cell {
            None => {
                self.grid_cell = Some(cell);
                GridCellUpdate::Recorded
            }
            Some(kept) if kept.same_cell(&cell) => GridCellUpdate::Unchanged,
            Some(kept) => {
                warn!(
                    "Grid cell for {} reported as ({}, {}) but ({}, {}) is already recorded; keeping it",
                    self.name, cell.lat, cell.lon, kept.lat, kept.lon
                );
                GridCellUpdate::Conflict {
                    kept,
                    reported: cell,
                }
            }
        }
    }
}

fn validate_coordinates(name: &str, lat: f64, lon: f64) -> Result<(), LocationError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(LocationError::InvalidCoordinates {
            name: name.to_string(),
            lat,
            lon,
        });
    }
    Ok(())
}

fn parse_tz(name: &str) -> Result<Tz, LocationError> {
    name.parse::<Tz>()
        .map_err(|_| LocationError::UnknownTimezone(name.to_string()))
}
