use crate::cache::error::CacheError;
use crate::planner::error::PlanError;
use thiserror::Error;

/// Failures that stop a location (`Cache`) or the whole run (`Plan`).
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Plan(#[from] PlanError),
}
