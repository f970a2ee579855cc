//! Error types shared by every backend.

use thiserror::Error;

use crate::{PassState, ShaderLanguage};

/// Everything that can go wrong inside the RHI.
///
/// Variants fall into three groups: configuration errors (the request can never succeed on this
/// device), native driver failures (carrying the driver's diagnostic text), and programmer
/// contract violations (out-of-range indices, misuse of a pass after `end`, ...).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RhiError {
    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------
    #[error("shader language {got:?} is not supported by this device (expected {expected:?})")]
    UnsupportedShaderLanguage {
        expected: ShaderLanguage,
        got: ShaderLanguage,
    },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("no backend registered under '{0}'")]
    UnknownBackend(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    // ------------------------------------------------------------------
    // Native driver failures
    // ------------------------------------------------------------------
    #[error("no suitable GPU adapter: {0}")]
    AdapterUnavailable(String),

    #[error("device creation failed: {0}")]
    DeviceCreation(String),

    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("residency set failure: {0}")]
    ResidencySet(String),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("driver error: {0}")]
    Driver(String),

    // ------------------------------------------------------------------
    // Contract violations
    // ------------------------------------------------------------------
    #[error("{kind} binding out of range: group {group}, binding {binding}")]
    BindingOutOfRange {
        kind: &'static str,
        group: u32,
        binding: u32,
    },

    #[error("render pass is {state:?}; cannot {operation}")]
    InvalidPassState {
        state: PassState,
        operation: &'static str,
    },

    #[error("write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("{what} {value} is not a multiple of {alignment}")]
    Misaligned {
        what: &'static str,
        value: u64,
        alignment: u64,
    },

    #[error("bind group does not match its layout: {0}")]
    LayoutMismatch(String),

    #[error("{0} was created by a different device or backend")]
    ForeignResource(&'static str),

    #[error("{0} has been disposed")]
    Disposed(&'static str),
}

impl RhiError {
    /// True for errors caused by misuse of the API rather than by the device or configuration.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RhiError::BindingOutOfRange { .. }
                | RhiError::InvalidPassState { .. }
                | RhiError::OutOfBounds { .. }
                | RhiError::Misaligned { .. }
                | RhiError::LayoutMismatch(_)
                | RhiError::ForeignResource(_)
                | RhiError::Disposed(_)
        )
    }
}

#[cfg(feature = "webgpu")]
impl From<wgpu::RequestDeviceError> for RhiError {
    fn from(err: wgpu::RequestDeviceError) -> Self {
        RhiError::DeviceCreation(err.to_string())
    }
}

#[cfg(feature = "webgpu")]
impl From<wgpu::CreateSurfaceError> for RhiError {
    fn from(err: wgpu::CreateSurfaceError) -> Self {
        RhiError::Surface(err.to_string())
    }
}

#[cfg(feature = "webgpu")]
impl From<wgpu::SurfaceError> for RhiError {
    fn from(err: wgpu::SurfaceError) -> Self {
        RhiError::Surface(err.to_string())
    }
}

impl From<raw_window_handle::HandleError> for RhiError {
    fn from(err: raw_window_handle::HandleError) -> Self {
        RhiError::UnsupportedPlatform(err.to_string())
    }
}

/// Alias for `Result<T, RhiError>`.
pub type Result<T> = std::result::Result<T, RhiError>;
