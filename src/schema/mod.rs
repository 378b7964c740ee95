pub mod error;
pub mod migration;
pub mod path;
pub mod registry;
