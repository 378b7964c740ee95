//! Talks to the Climate Data Store: builds job requests, runs them through the
//! submit/poll/download protocol and decodes the payloads.

pub mod client;
pub mod credentials;
pub mod decode;
pub mod error;
pub mod job;
pub mod raw_cache;
pub mod request;
pub mod transport;
