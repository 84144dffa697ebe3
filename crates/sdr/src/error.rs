//! Error types for the device layer.
//!
//! Every backend reports failures through [`DeviceError`] so the rest of
//! the system never sees vendor-specific error codes. The variants mirror
//! the classic SDR driver taxonomy: library/symbol resolution, device
//! open, busy, rate negotiation, parameter validation, range checks.

/// The error type for all device-layer operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Unspecified backend failure (vendor call returned an error).
    #[error("backend error: {0}")]
    Backend(String),

    /// The vendor driver library or one of its required symbols could not
    /// be resolved. Binding is all-or-nothing; a partially bound table is
    /// never kept.
    #[error("driver library error: {0}")]
    Lib(String),

    /// The device is already initialized.
    #[error("device busy")]
    Busy,

    /// The hardware device could not be opened.
    #[error("failed to open device: {0}")]
    Open(String),

    /// The requested sample rate could not be negotiated with the device.
    #[error("unsupported sample rate: {0} Hz")]
    SampleRate(f32),

    /// An invalid parameter (unsupported stage, unknown option, no
    /// acceptable rate mapping).
    #[error("invalid parameter: {0}")]
    Invalid(String),

    /// A value outside the advertised range (frequency, gain 0-100).
    #[error("value out of range: {0}")]
    Range(String),

    /// An underlying I/O error (file-based backends).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`DeviceError`].
pub type Result<T> = std::result::Result<T, DeviceError>;
