use crate::cache::error::CacheError;
use crate::config::ConfigError;
use crate::coordinator::error::CoordinatorError;
use crate::planner::error::PlanError;
use crate::retrieval::error::RetrievalError;
use crate::schema::error::{RegistryError, SchemaError};
use crate::types::error::LocationError;
use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Era5ClimateError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Frame(#[from] PolarsError),

    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to determine cache directory")]
    CacheDirResolution(#[source] std::io::Error),
}
