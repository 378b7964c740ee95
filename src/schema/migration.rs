use crate::schema::error::SchemaError;
use crate::schema::path;
use crate::schema::registry::{MigrationRule, SchemaRegistry, SchemaVersionSpec};
use log::debug;
use serde_json::{Map, Value};

impl SchemaRegistry {
    /// Upgrades `document` to [`SchemaRegistry::current_version`].
    ///
    /// Each step validates the document against its declared version, builds a fresh
    /// document from the owning version's [`MigrationRule`] and validates the result against
    /// the new version. The input is never modified: callers get either a fully migrated
    /// document or an error. A document already at the current version is only validated,
    /// so `migrate(migrate(d)) == migrate(d)`.
    ///
    /// # Errors
    ///
    /// * [`SchemaError::Legacy`] if the document has no `schema_version`.
    /// * [`SchemaError::InvalidVersionTag`] if the version is not an integer.
    /// * [`SchemaError::UnsupportedVersion`] if the version is newer than current, unknown,
    ///   or has no rule leading forward.
    /// * [`SchemaError::Validation`] if the document breaks a version's contract.
    /// * [`SchemaError::MissingMigrationSource`] if no data block can be found to migrate.
    pub fn migrate(&self, document: &Value) -> Result<Value, SchemaError> {
        let current = self.current_version();
        let mut version = Self::detect_version(document)?;
        if version > current || self.spec(version).is_none() {
            return Err(SchemaError::UnsupportedVersion {
                version: i64::from(version),
                current,
            });
        }

        self.validate(document, version)?;
        let mut working = document.clone();

        while version < current {
            let source = self.spec(version).ok_or(SchemaError::UnsupportedVersion {
                version: i64::from(version),
                current,
            })?;
            let target = self
                .upgrade_from(version)
                .ok_or(SchemaError::UnsupportedVersion {
                    version: i64::from(version),
                    current,
                })?;
            let Some(rule) = target.migration.as_ref() else {
                return Err(SchemaError::UnsupportedVersion {
                    version: i64::from(version),
                    current,
                });
            };

            working = apply_rule(&working, source, target, rule)?;
            self.validate(&working, target.version)?;
            debug!("Migrated cache document from schema {} to {}", version, target.version);
            version = target.version;
        }

        Ok(working)
    }
}

fn apply_rule(
    document: &Value,
    source: &SchemaVersionSpec,
    target: &SchemaVersionSpec,
    rule: &MigrationRule,
) -> Result<Value, SchemaError> {
    let mut out = Value::Object(Map::new());

    for (target_path, mapping) in &rule.field_mappings {
        let is_data_block = target.primary_data_path.as_deref() == Some(target_path.as_str());
        let mut resolved = mapping
            .candidates()
            .into_iter()
            .find_map(|p| path::get(document, p));
        if resolved.is_none() && is_data_block {
            resolved = source.data_paths().find_map(|p| path::get(document, p));
        }

        match resolved {
            Some(value) => path::set(&mut out, target_path, value.clone()),
            None if is_data_block => {
                return Err(SchemaError::MissingMigrationSource {
                    from: source.version,
                    to: target.version,
                    target: target_path.clone(),
                });
            }
            None => {}
        }
    }

    for (target_path, default) in &rule.defaults {
        if !path::contains(&out, target_path) {
            path::set(&mut out, target_path, default.clone());
        }
    }

    path::set(&mut out, "schema_version", Value::from(target.version));
    Ok(out)
}
