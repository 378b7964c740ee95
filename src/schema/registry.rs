//! Declarative description of every cache document version this crate understands.
//!
//! The registry is data, not code: each [`SchemaVersionSpec`] lists the paths a document of
//! that version must contain and, optionally, a [`MigrationRule`] describing how to build it
//! from the previous version. A single generic engine (see [`SchemaRegistry::migrate`]) walks
//! those rules.

use crate::schema::error::{RegistryError, SchemaError};
use crate::schema::path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

const BUILTIN_REGISTRY: &str = include_str!("registry.json");

/// Where a migrated field comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldMapping {
    /// Copy the value found at this dot-path.
    Path(String),
    /// Copy from `source_path`, or else from the first present of `source_candidates`.
    Sources {
        #[serde(default)]
        source_path: Option<String>,
        #[serde(default)]
        source_candidates: Vec<String>,
    },
}

impl FieldMapping {
    /// Source paths in lookup order.
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            FieldMapping::Path(p) => vec![p.as_str()],
            FieldMapping::Sources {
                source_path,
                source_candidates,
            } => source_path
                .iter()
                .chain(source_candidates.iter())
                .map(String::as_str)
                .collect(),
        }
    }
}

/// How to rewrite a document of `from_version` into the version that owns this rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRule {
    pub from_version: u32,
    /// Target dot-path → source.
    pub field_mappings: BTreeMap<String, FieldMapping>,
    /// Values written at target dot-paths the mappings left empty.
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersionSpec {
    pub version: u32,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub required_any_of: Vec<Vec<String>>,
    #[serde(default)]
    pub primary_data_path: Option<String>,
    #[serde(default)]
    pub legacy_data_paths: Vec<String>,
    #[serde(default)]
    pub migration: Option<MigrationRule>,
}

impl SchemaVersionSpec {
    /// Paths where this version keeps its data block: the primary path, then the legacy ones.
    pub fn data_paths(&self) -> impl Iterator<Item = &str> {
        self.primary_data_path
            .iter()
            .chain(self.legacy_data_paths.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    versions: Vec<SchemaVersionSpec>,
}

/// The ordered, validated set of known schema versions. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRegistry {
    versions: Vec<SchemaVersionSpec>,
}

impl SchemaRegistry {
    /// Loads the registry shipped with the crate.
    ///
    /// # Errors
    ///
    /// Only fails if the embedded registry is malformed.
    pub fn load_registry() -> Result<Self, RegistryError> {
        Self::from_json_str(BUILTIN_REGISTRY)
    }

    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Read(path.to_path_buf(), e))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RegistryError> {
        let doc: RegistryDocument = serde_json::from_str(raw)?;
        Self::from_versions(doc.versions)
    }

    pub fn from_versions(versions: Vec<SchemaVersionSpec>) -> Result<Self, RegistryError> {
        if versions.is_empty() {
            return Err(RegistryError::Empty);
        }
        for pair in versions.windows(2) {
            if pair[1].version <= pair[0].version {
                return Err(RegistryError::Unordered {
                    previous: pair[0].version,
                    next: pair[1].version,
                });
            }
        }
        for spec in &versions {
            validate_spec(spec, &versions)?;
        }
        Ok(Self { versions })
    }

    pub fn versions(&self) -> &[SchemaVersionSpec] {
        &self.versions
    }

    /// The highest known version; the only one documents are written in.
    pub fn current_version(&self) -> u32 {
        self.current().version
    }

    pub fn current(&self) -> &SchemaVersionSpec {
        // Non-empty by construction.
        &self.versions[self.versions.len() - 1]
    }

    pub fn spec(&self, version: u32) -> Option<&SchemaVersionSpec> {
        self.versions.iter().find(|s| s.version == version)
    }

    /// The version whose migration rule upgrades documents of `from_version`.
    pub(crate) fn upgrade_from(&self, from_version: u32) -> Option<&SchemaVersionSpec> {
        self.versions.iter().find(|s| {
            s.version > from_version
                && s.migration
                    .as_ref()
                    .is_some_and(|m| m.from_version == from_version)
        })
    }

    /// Checks `document` against the contract of `version`.
    ///
    /// # Errors
    ///
    /// [`SchemaError::UnsupportedVersion`] when `version` is unknown, and
    /// [`SchemaError::Validation`] naming every missing path or path group.
    pub fn validate(&self, document: &Value, version: u32) -> Result<(), SchemaError> {
        let spec = self
            .spec(version)
            .ok_or(SchemaError::UnsupportedVersion {
                version: i64::from(version),
                current: self.current_version(),
            })?;

        let mut missing: Vec<String> = spec
            .required
            .iter()
            .filter(|p| !path::contains(document, p))
            .cloned()
            .collect();
        for group in &spec.required_any_of {
            if !group.iter().any(|p| path::contains(document, p)) {
                missing.push(format!("one of [{}]", group.join(", ")));
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Validation { version, missing })
        }
    }

    /// Reads the declared `schema_version` of a document.
    ///
    /// Integer strings are accepted since older writers quoted the version.
    pub fn detect_version(document: &Value) -> Result<u32, SchemaError> {
        let raw = match document.get("schema_version") {
            None | Some(Value::Null) => return Err(SchemaError::Legacy),
            Some(raw) => raw,
        };
        let parsed = match raw {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        let version = parsed.ok_or_else(|| SchemaError::InvalidVersionTag(raw.to_string()))?;
        u32::try_from(version).map_err(|_| SchemaError::InvalidVersionTag(raw.to_string()))
    }
}

fn validate_spec(
    spec: &SchemaVersionSpec,
    all: &[SchemaVersionSpec],
) -> Result<(), RegistryError> {
    let invalid = |field, problem| RegistryError::InvalidField {
        version: spec.version,
        field,
        problem,
    };
    if spec.required.iter().any(|p| p.trim().is_empty()) {
        return Err(invalid("required", "must contain non-empty paths"));
    }
    for group in &spec.required_any_of {
        if group.is_empty() || group.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid(
                "required_any_of",
                "must contain non-empty groups of non-empty paths",
            ));
        }
    }
    if spec.data_paths().any(|p| p.trim().is_empty()) {
        return Err(invalid("legacy_data_paths", "must contain non-empty paths"));
    }
    if let Some(rule) = &spec.migration {
        let known_older = all
            .iter()
            .any(|s| s.version == rule.from_version && s.version < spec.version);
        if !known_older {
            return Err(RegistryError::InvalidMigrationSource {
                version: spec.version,
                from_version: rule.from_version,
            });
        }
        if rule.field_mappings.is_empty() {
            return Err(invalid("migration.field_mappings", "must not be empty"));
        }
        if rule
            .field_mappings
            .iter()
            .any(|(target, m)| target.trim().is_empty() || m.candidates().is_empty())
        {
            return Err(invalid(
                "migration.field_mappings",
                "must map non-empty targets to at least one source",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_loads() {
        let registry = SchemaRegistry::load_registry().unwrap();
        assert_eq!(registry.current_version(), 2);
        assert_eq!(registry.versions().len(), 2);
        assert_eq!(registry.upgrade_from(1).map(|s| s.version), Some(2));
        assert!(registry.upgrade_from(2).is_none());
    }

    #[test]
    fn validation_names_missing_paths() {
        let registry = SchemaRegistry::load_registry().unwrap();
        let doc = json!({"schema_version": 1, "place": {"name": "x", "lat": 1.0}});
        let err = registry.validate(&doc, 1).unwrap_err();
        let SchemaError::Validation { version, missing } = err else {
            panic!("expected validation error");
        };
        assert_eq!(version, 1);
        assert!(missing.contains(&"place.lon".to_string()));
        assert!(missing.contains(&"one of [noon_temperatures, temp_map_v1]".to_string()));
        assert!(!missing.contains(&"place.name".to_string()));
    }

    #[test]
    fn validate_rejects_unknown_version() {
        let registry = SchemaRegistry::load_registry().unwrap();
        assert_eq!(
            registry.validate(&json!({}), 7),
            Err(SchemaError::UnsupportedVersion {
                version: 7,
                current: 2
            })
        );
    }

    #[test]
    fn detects_versions() {
        assert_eq!(
            SchemaRegistry::detect_version(&json!({"schema_version": 2})),
            Ok(2)
        );
        assert_eq!(
            SchemaRegistry::detect_version(&json!({"schema_version": "1"})),
            Ok(1)
        );
        assert_eq!(
            SchemaRegistry::detect_version(&json!({"place": {}})),
            Err(SchemaError::Legacy)
        );
        assert!(matches!(
            SchemaRegistry::detect_version(&json!({"schema_version": "two"})),
            Err(SchemaError::InvalidVersionTag(_))
        ));
    }

    #[test]
    fn malformed_registries_are_rejected() {
        assert!(matches!(
            SchemaRegistry::from_json_str(r#"{"versions": []}"#),
            Err(RegistryError::Empty)
        ));
        assert!(matches!(
            SchemaRegistry::from_json_str(
                r#"{"versions": [{"version": 2}, {"version": 1}]}"#
            ),
            Err(RegistryError::Unordered { .. })
        ));
        assert!(matches!(
            SchemaRegistry::from_json_str(
                r#"{"versions": [{"version": 1, "required_any_of": [[]]}]}"#
            ),
            Err(RegistryError::InvalidField { .. })
        ));
        assert!(matches!(
            SchemaRegistry::from_json_str(
                r#"{"versions": [{"version": 1}, {"version": 2, "migration": {"from_version": 3, "field_mappings": {"a": "b"}}}]}"#
            ),
            Err(RegistryError::InvalidMigrationSource { .. })
        ));
    }
}
