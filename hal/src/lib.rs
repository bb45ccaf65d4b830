pub mod buffers;
pub mod cpu;
pub mod gpu;
pub mod pipeline;
pub mod shaders;

pub use gpu::{list_adapters, AdapterEntry, GpuContext};
pub use pipeline::{EqualizePipeline, EqualizeReport, RunState, StageTimings, TimingSource};
pub use shaders::BIN_COUNT;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Kernel error: {0}")]
    KernelError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn backend_not_available(msg: impl Into<String>) -> Self {
        Self::BackendNotAvailable(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
