//! Per-location cache of daily values.
//!
//! Each location is one JSON file, `<name>.json`, below the data cache directory (see
//! [`codec`] for the layout). Only that format is read. Caches written as YAML by other tools
//! are not picked up, and YAML text at the JSON path fails to load with
//! [`error::CacheError::Parse`]. Convert such files to JSON before pointing a store at them.

pub mod codec;
pub mod document;
pub mod error;
pub mod store;
