use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Coordinates ({lat}, {lon}) of '{name}' are out of range")]
    InvalidCoordinates { name: String, lat: f64, lon: f64 },

    #[error("Unable to determine timezone for '{name}' at ({lat}, {lon})")]
    UnresolvableTimezone { name: String, lat: f64, lon: f64 },

    #[error("Unknown IANA timezone '{0}'")]
    UnknownTimezone(String),
}
