use std::path::PathBuf;
use thiserror::Error;

/// A cache document is structurally invalid or cannot be brought to the current version.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Document is not valid under schema_version {version}: missing {}", missing.join("; "))]
    Validation { version: u32, missing: Vec<String> },

    #[error("Unsupported schema_version {version} (current is {current})")]
    UnsupportedVersion { version: i64, current: u32 },

    #[error("Unversioned legacy cache documents are not supported")]
    Legacy,

    #[error("Invalid schema_version value: {0}")]
    InvalidVersionTag(String),

    #[error("Migration {from} -> {to} found no source for '{target}'")]
    MissingMigrationSource { from: u32, to: u32, target: String },
}

/// The schema registry itself is malformed.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read schema registry '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse schema registry")]
    Parse(#[from] serde_json::Error),

    #[error("Schema registry defines no versions")]
    Empty,

    #[error("Schema registry versions must be strictly increasing, found {previous} before {next}")]
    Unordered { previous: u32, next: u32 },

    #[error("Schema version {version} field '{field}' {problem}")]
    InvalidField {
        version: u32,
        field: &'static str,
        problem: &'static str,
    },

    #[error("Schema version {version} migrates from unknown or newer version {from_version}")]
    InvalidMigrationSource { version: u32, from_version: u32 },
}
