//! Error types for the capture engine

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a page or capturing it
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to launch the browser or open a page
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load a URL or document content
    #[error("Failed to load page: {0}")]
    LoadError(String),

    /// An in-page script threw or returned something unusable
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid capture options
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The selector was blank or matched nothing
    #[error("Selector matched no elements: {0:?}")]
    SelectorEmpty(String),

    /// No element relevant to the capture could be measured
    #[error("Bounding box unavailable: {0}")]
    BoundingBoxUnavailable(String),

    /// Building the temporary stitch container failed
    #[error("Failed to build stitch container: {0}")]
    StitchContainerCreationFailed(String),

    /// The screenshot primitive failed on every attempt
    #[error("Screenshot failed after {attempts} attempt(s): {message}")]
    CaptureFailed { message: String, attempts: usize },

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Filesystem error while persisting output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Name of the capture stage this error belongs to, for user-facing reports.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::InitializationError(_) => "launch",
            Error::LoadError(_) => "load",
            Error::ScriptError(_) | Error::Timeout(_) => "page",
            Error::ConfigError(_) => "options",
            Error::SelectorEmpty(_) => "selector",
            Error::BoundingBoxUnavailable(_) => "measure",
            Error::StitchContainerCreationFailed(_) => "stitch",
            Error::CaptureFailed { .. } => "capture",
            #[cfg(feature = "cdp")]
            Error::CdpError(_) => "browser",
            Error::Io(_) => "output",
            Error::Other(_) => "unknown",
        }
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
