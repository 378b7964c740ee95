pub mod daily_value;
pub mod error;
pub mod location;
pub mod measure;
pub mod mode;
pub mod raw;
pub mod request_window;
