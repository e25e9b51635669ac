use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Declaration errors (`InvalidDomain`, `UnknownParameter`,
/// `DuplicateParameter`) indicate a bug in a parameter-space definition and
/// are never retried. `Compile` and `Launch` come back from the device
/// backend; a failed compile leaves the affected cache entry unready so a
/// later call will attempt it again.
#[derive(Debug, Error)]
pub enum TessellaError {
    #[error("parameter `{param}`: value {value} is outside the declared domain")]
    InvalidDomain { param: String, value: i64 },

    #[error("constraint references undeclared parameter `{0}`")]
    UnknownParameter(String),

    #[error("parameter `{0}` is already declared")]
    DuplicateParameter(String),

    #[error("kernel `{kernel}` failed to compile: {log}")]
    Compile { kernel: String, log: String },

    #[error("kernel `{kernel}` failed to launch: {reason}")]
    Launch { kernel: String, reason: String },

    #[error("device error: {0}")]
    Device(String),

    #[error("engine lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, TessellaError>;
