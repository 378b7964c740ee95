pub mod cache;
pub mod config;
pub mod coordinator;
mod era5_climate;
mod error;
pub mod matcher;
pub mod planner;
pub mod retrieval;
pub mod schema;
mod types;
mod utils;

pub use era5_climate::*;
pub use error::Era5ClimateError;

pub use config::{ClientSettings, ConfigError, FlushPolicy, RetrievalSettings, RuntimePaths, Settings};

pub use types::daily_value::DailyValue;
pub use types::error::LocationError;
pub use types::location::{GridCell, GridCellUpdate, Location};
pub use types::measure::{CacheVariable, Measure};
pub use types::mode::{ChunkMode, DailySource, FetchMode};
pub use types::raw::{GridSeries, RawDataset, RawSample};
pub use types::request_window::RequestWindow;

pub use cache::document::CacheDocument;
pub use cache::error::CacheError;
pub use cache::store::CacheStore;
pub use schema::error::{RegistryError, SchemaError};
pub use schema::registry::SchemaRegistry;

pub use matcher::{match_window, MatchSettings, WindowMatch};
pub use planner::error::PlanError;
pub use planner::ChunkPlanner;

pub use retrieval::client::{FetchedPayload, JobOutcome, RetrievalClient};
pub use retrieval::credentials::Credentials;
pub use retrieval::error::RetrievalError;
pub use retrieval::job::{JobEvent, JobState, RemoteStatus};
pub use retrieval::transport::{CdsTransport, RemoteJob, Transport};

pub use coordinator::dataset::{DatasetRow, MergedDataset};
pub use coordinator::error::CoordinatorError;
pub use coordinator::observer::{NoopObserver, RetrievalObserver, WindowOutcome};
pub use coordinator::summary::{format_retrieval_plan, LocationSummary, RetrievalSummary};
pub use coordinator::{RetrievalCoordinator, RetrievalOutcome};
