//! Reads downloaded payloads into per-grid-cell series.
//!
//! The service answers with a CSV (time series product), a NetCDF file, or either of them
//! inside a zip archive, optionally gzip-compressed. The format is sniffed from the leading
//! bytes rather than trusted from the file name.

use crate::retrieval::error::RetrievalError;
use crate::types::location::{GridCell, Location};
use crate::types::measure::Measure;
use crate::types::raw::{GridSeries, RawDataset, RawSample};
use async_compression::tokio::bufread::GzipDecoder;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use haversine::{distance, Location as HaversineLocation, Units};
use log::debug;
use ordered_float::OrderedFloat;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::task;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const NETCDF_CLASSIC_MAGIC: &[u8] = b"CDF";
const HDF5_MAGIC: &[u8] = b"\x89HDF";

/// Upper bound on the buffer reserved up front for a zip entry; the header size is untrusted.
const MAX_ENTRY_RESERVE: u64 = 64 << 20;

const TIME_COLUMNS: [&str; 3] = ["valid_time", "time", "date"];

/// Decodes the payload at `path` and returns the series of the grid cell nearest to `location`.
pub async fn decode_payload(
    path: &Path,
    measure: Measure,
    location: &Location,
) -> Result<GridSeries, RetrievalError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| RetrievalError::Io(path.to_path_buf(), e))?;
    let bytes = gunzip_if_compressed(bytes).await?;

    let path_buf = path.to_path_buf();
    let dataset = task::spawn_blocking(move || read_payload(&path_buf, &bytes, measure)).await??;
    debug!(
        "Decoded {} grid cell(s) of {} from {}",
        dataset.series.len(),
        dataset.variable,
        path.display()
    );

    nearest_series(dataset, location)
        .ok_or_else(|| RetrievalError::decode(path, "payload contains no samples"))
}

async fn gunzip_if_compressed(bytes: Vec<u8>) -> Result<Vec<u8>, RetrievalError> {
    if !bytes.starts_with(GZIP_MAGIC) {
        return Ok(bytes);
    }
    let mut decoder = GzipDecoder::new(bytes.as_slice());
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).await?;
    Ok(decompressed)
}

/// Parses a payload that is already decompressed.
pub fn read_payload(path: &Path, bytes: &[u8], measure: Measure) -> Result<RawDataset, RetrievalError> {
    if bytes.starts_with(ZIP_MAGIC) {
        read_zip(path, bytes, measure)
    } else if bytes.starts_with(NETCDF_CLASSIC_MAGIC) || bytes.starts_with(HDF5_MAGIC) {
        read_netcdf(path, bytes, measure)
    } else {
        read_csv(path, bytes, measure)
    }
}

fn read_zip(path: &Path, bytes: &[u8], measure: Measure) -> Result<RawDataset, RetrievalError> {
    let mut archive = ::zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| RetrievalError::Zip(path.to_path_buf(), e))?;

    let mut merged = RawDataset {
        variable: measure.short_name().to_string(),
        series: Vec::new(),
    };
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| RetrievalError::Zip(path.to_path_buf(), e))?;
        if entry.is_dir() {
            continue;
        }
        let entry_path = path.join(entry.name());
        let mut inner = Vec::with_capacity(entry_reserve(entry.size()));
        entry
            .read_to_end(&mut inner)
            .map_err(|e| RetrievalError::Io(entry_path.clone(), e))?;
        if inner.starts_with(ZIP_MAGIC) {
            return Err(RetrievalError::decode(entry_path, "nested zip archives are not supported"));
        }
        let dataset = read_payload(&entry_path, &inner, measure)?;
        merged.series.extend(dataset.series);
    }
    if merged.series.is_empty() {
        return Err(RetrievalError::decode(path, "zip archive holds no readable entry"));
    }
    Ok(merge_cells(merged))
}

/// Bytes to reserve for an entry whose header claims `claimed` bytes.
fn entry_reserve(claimed: u64) -> usize {
    claimed.min(MAX_ENTRY_RESERVE) as usize
}

fn read_csv(path: &Path, bytes: &[u8], measure: Measure) -> Result<RawDataset, RetrievalError> {
    let io_err = |e| RetrievalError::Io(path.to_path_buf(), e);
    let mut temp_file = NamedTempFile::new().map_err(io_err)?;
    temp_file.write_all(bytes).map_err(io_err)?;
    temp_file.flush().map_err(io_err)?;

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(temp_file.path().to_path_buf()))
        .map_err(|e| RetrievalError::CsvDecode(path.to_path_buf(), e))?
        .finish()
        .map_err(|e| RetrievalError::CsvDecode(path.to_path_buf(), e))?;

    frame_to_dataset(path, &df, measure)
}

fn find_column<'a>(df: &'a DataFrame, names: &[&str]) -> Option<&'a Column> {
    names.iter().find_map(|name| df.column(name).ok())
}

fn float_values(path: &Path, column: &Column) -> Result<Vec<Option<f64>>, RetrievalError> {
    let cast = column
        .cast(&DataType::Float64)
        .map_err(|e| RetrievalError::CsvDecode(path.to_path_buf(), e))?;
    let values = cast
        .as_materialized_series()
        .f64()
        .map_err(|e| RetrievalError::CsvDecode(path.to_path_buf(), e))?
        .into_iter()
        .collect();
    Ok(values)
}

fn frame_to_dataset(path: &Path, df: &DataFrame, measure: Measure) -> Result<RawDataset, RetrievalError> {
    let time_col = find_column(df, &TIME_COLUMNS)
        .ok_or_else(|| RetrievalError::decode(path, "no time column"))?;
    let value_col = find_column(df, &[measure.short_name(), measure.source_variable()])
        .ok_or_else(|| {
            RetrievalError::decode(path, format!("no '{}' column", measure.short_name()))
        })?;

    let times = time_col
        .cast(&DataType::String)
        .map_err(|e| RetrievalError::CsvDecode(path.to_path_buf(), e))?;
    let times: Vec<Option<String>> = times
        .as_materialized_series()
        .str()
        .map_err(|e| RetrievalError::CsvDecode(path.to_path_buf(), e))?
        .into_iter()
        .map(|t| t.map(str::to_string))
        .collect();
    let values = float_values(path, value_col)?;
    let lats = match find_column(df, &["latitude", "lat"]) {
        Some(col) => Some(float_values(path, col)?),
        None => None,
    };
    let lons = match find_column(df, &["longitude", "lon"]) {
        Some(col) => Some(float_values(path, col)?),
        None => None,
    };

    let mut rows = Vec::with_capacity(df.height());
    for (i, (time, value)) in times.iter().zip(values).enumerate() {
        let (Some(time), Some(value)) = (time, value) else {
            continue;
        };
        let time = parse_timestamp(time)
            .ok_or_else(|| RetrievalError::decode(path, format!("unparseable time '{time}'")))?;
        let lat = lats.as_ref().and_then(|l| l[i]).unwrap_or(f64::NAN);
        let lon = lons.as_ref().and_then(|l| l[i]).unwrap_or(f64::NAN);
        rows.push((GridCell::new(lat, lon), RawSample::new(time, measure.convert(value))));
    }
    Ok(collect_dataset(measure, rows))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let raw = raw.trim_end_matches('Z').trim_end_matches("+00:00");
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn collect_dataset(measure: Measure, rows: Vec<(GridCell, RawSample)>) -> RawDataset {
    let mut cells: BTreeMap<(OrderedFloat<f64>, OrderedFloat<f64>), Vec<RawSample>> = BTreeMap::new();
    for (cell, sample) in rows {
        if !sample.value.is_finite() {
            continue;
        }
        cells
            .entry((OrderedFloat(cell.lat), OrderedFloat(cell.lon)))
            .or_default()
            .push(sample);
    }
    RawDataset {
        variable: measure.short_name().to_string(),
        series: cells
            .into_iter()
            .map(|((lat, lon), samples)| GridSeries::new(GridCell::new(lat.0, lon.0), samples))
            .collect(),
    }
}

/// Joins series that describe the same cell, as produced by multi-file archives.
fn merge_cells(dataset: RawDataset) -> RawDataset {
    let mut cells: BTreeMap<(OrderedFloat<f64>, OrderedFloat<f64>), Vec<RawSample>> = BTreeMap::new();
    for series in dataset.series {
        cells
            .entry((OrderedFloat(series.cell.lat), OrderedFloat(series.cell.lon)))
            .or_default()
            .extend(series.samples);
    }
    RawDataset {
        variable: dataset.variable,
        series: cells
            .into_iter()
            .map(|((lat, lon), mut samples)| {
                samples.sort_by_key(|s| s.time);
                samples.dedup_by_key(|s| s.time);
                GridSeries::new(GridCell::new(lat.0, lon.0), samples)
            })
            .collect(),
    }
}

/// The series whose cell centre is closest to `location`. A point series without coordinates
/// is taken to be the location itself.
pub fn nearest_series(dataset: RawDataset, location: &Location) -> Option<GridSeries> {
    dataset
        .series
        .into_iter()
        .filter(|s| !s.samples.is_empty())
        .map(|mut series| {
            if series.cell.lat.is_nan() || series.cell.lon.is_nan() {
                series.cell = GridCell::new(location.lat, location.lon);
            }
            let target = HaversineLocation {
                latitude: location.lat,
                longitude: location.lon,
            };
            let km = distance(
                target,
                HaversineLocation {
                    latitude: series.cell.lat,
                    longitude: normalize_lon(series.cell.lon),
                },
                Units::Kilometers,
            );
            (OrderedFloat(km), series)
        })
        .min_by_key(|(km, _)| *km)
        .map(|(_, series)| series)
}

/// Grid longitudes may be given as 0..360.
fn normalize_lon(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

#[cfg(not(feature = "netcdf"))]
fn read_netcdf(path: &Path, _bytes: &[u8], _measure: Measure) -> Result<RawDataset, RetrievalError> {
    Err(RetrievalError::decode(
        path,
        "NetCDF payloads need the `netcdf` feature",
    ))
}

#[cfg(feature = "netcdf")]
fn read_netcdf(path: &Path, bytes: &[u8], measure: Measure) -> Result<RawDataset, RetrievalError> {
    let io_err = |e| RetrievalError::Io(path.to_path_buf(), e);
    let mut temp_file = NamedTempFile::new().map_err(io_err)?;
    temp_file.write_all(bytes).map_err(io_err)?;
    temp_file.flush().map_err(io_err)?;

    let nc_err = |e| RetrievalError::NetCdf(path.to_path_buf(), e);
    let file = netcdf::open(temp_file.path()).map_err(nc_err)?;

    let lats = read_coordinate(&file, &["latitude", "lat"]).map_err(nc_err)?;
    let lons = read_coordinate(&file, &["longitude", "lon"]).map_err(nc_err)?;
    let (Some(lats), Some(lons)) = (lats, lons) else {
        return Err(RetrievalError::decode(path, "missing latitude/longitude"));
    };

    let time_var = TIME_COLUMNS
        .iter()
        .find_map(|name| file.variable(name))
        .ok_or_else(|| RetrievalError::decode(path, "no time variable"))?;
    let units = string_attribute(&time_var, "units")
        .ok_or_else(|| RetrievalError::decode(path, "time variable has no units"))?;
    let (step_secs, epoch) = parse_time_units(&units)
        .ok_or_else(|| RetrievalError::decode(path, format!("unsupported time units '{units}'")))?;
    let offsets: Vec<f64> = time_var.get_values(..).map_err(nc_err)?;

    let var = file
        .variable(measure.short_name())
        .ok_or_else(|| RetrievalError::decode(path, format!("no '{}' variable", measure.short_name())))?;
    let scale = float_attribute(&var, "scale_factor").unwrap_or(1.0);
    let offset = float_attribute(&var, "add_offset").unwrap_or(0.0);
    let fill = float_attribute(&var, "_FillValue");
    let raw: Vec<f64> = var.get_values(..).map_err(nc_err)?;

    let (nt, nlat, nlon) = (offsets.len(), lats.len(), lons.len());
    if raw.len() != nt * nlat * nlon {
        return Err(RetrievalError::decode(
            path,
            format!("'{}' has {} values, expected {nt}x{nlat}x{nlon}", measure.short_name(), raw.len()),
        ));
    }

    let mut rows = Vec::with_capacity(raw.len());
    for (t, step) in offsets.iter().enumerate() {
        let millis = (step * step_secs * 1000.0).round() as i64;
        let Some(time) = epoch.checked_add_signed(chrono::TimeDelta::milliseconds(millis)) else {
            continue;
        };
        for (i, lat) in lats.iter().enumerate() {
            for (j, lon) in lons.iter().enumerate() {
                let value = raw[(t * nlat + i) * nlon + j];
                if fill.is_some_and(|f| value == f) {
                    continue;
                }
                let physical = value * scale + offset;
                rows.push((
                    GridCell::new(*lat, *lon),
                    RawSample::new(time, measure.convert(physical)),
                ));
            }
        }
    }
    Ok(collect_dataset(measure, rows))
}

#[cfg(feature = "netcdf")]
fn read_coordinate(file: &netcdf::File, names: &[&str]) -> Result<Option<Vec<f64>>, netcdf::Error> {
    for name in names {
        if let Some(var) = file.variable(name) {
            return var.get_values(..).map(Some);
        }
    }
    Ok(None)
}

#[cfg(feature = "netcdf")]
fn float_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Double(d) => Some(d),
            netcdf::AttributeValue::Float(f) => Some(f as f64),
            netcdf::AttributeValue::Short(s) => Some(s as f64),
            _ => None,
        })
}

#[cfg(feature = "netcdf")]
fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Str(s) => Some(s),
            _ => None,
        })
}

/// `"hours since 1900-01-01 00:00:00.0"` -> (3600.0, 1900-01-01T00:00:00Z)
#[cfg_attr(not(feature = "netcdf"), allow(dead_code))]
fn parse_time_units(units: &str) -> Option<(f64, DateTime<Utc>)> {
    let (unit, reference) = units.split_once(" since ")?;
    let step = match unit.trim() {
        "seconds" | "second" | "s" => 1.0,
        "minutes" | "minute" => 60.0,
        "hours" | "hour" | "h" => 3600.0,
        "days" | "day" | "d" => 86_400.0,
        _ => return None,
    };
    let reference = reference.trim();
    let reference = reference
        .split_once('.')
        .map(|(head, _)| head)
        .unwrap_or(reference);
    Some((step, parse_timestamp(reference)?))
}
