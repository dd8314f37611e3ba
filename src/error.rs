use thiserror::Error;

/// Errors that stop the bridge from starting.
///
/// Nothing in here is produced while polling; a failed poll only ever shows up
/// as absent values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("serial number {0} cannot be represented in 4 bytes")]
    InvalidSerial(u64),

    #[error("configuration parameter [{0}] does not have a value")]
    MissingParameter(&'static str),

    #[error("sensor {0} does not exist")]
    UnknownSensor(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
