//! Errors surfaced by the frame service.

use crate::capture::ConfigError;
use crate::firmware::FirmwareError;
use thiserror::Error;

/// Errors returned from `start` and `next`.
///
/// Malformed deliveries and failed buffer returns are not represented here:
/// they are logged and counted, and never reach the caller.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A component, pool or other resource could not be allocated.
    #[error("resource creation failed: {context}")]
    ResourceCreation {
        context: String,
        #[source]
        source: Option<FirmwareError>,
    },

    /// The firmware rejected a port format.
    #[error("format negotiation failed: {context}")]
    FormatNegotiation {
        context: String,
        #[source]
        source: FirmwareError,
    },

    /// A port, sink or component could not be enabled.
    #[error("enable failed: {context}")]
    PortEnable {
        context: String,
        #[source]
        source: FirmwareError,
    },

    /// The capture request was refused.
    #[error("capture trigger failed")]
    CaptureTrigger(#[source] FirmwareError),

    #[error("capture session not started")]
    NotStarted,

    /// The capture port went away while waiting for a frame.
    #[error("fatal hardware condition: {0}")]
    FatalHardware(String),

    #[error("output buffer is {actual} bytes, frame needs {expected}")]
    OutputSize { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl CaptureError {
    pub(crate) fn resource(context: impl Into<String>) -> Self {
        Self::ResourceCreation {
            context: context.into(),
            source: None,
        }
    }

    pub(crate) fn firmware_resource(context: impl Into<String>, source: FirmwareError) -> Self {
        Self::ResourceCreation {
            context: context.into(),
            source: Some(source),
        }
    }

    pub(crate) fn format(context: impl Into<String>, source: FirmwareError) -> Self {
        Self::FormatNegotiation {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn enable(context: impl Into<String>, source: FirmwareError) -> Self {
        Self::PortEnable {
            context: context.into(),
            source,
        }
    }

    /// Returns true for errors raised while building a session.
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            Self::ResourceCreation { .. }
                | Self::FormatNegotiation { .. }
                | Self::PortEnable { .. }
                | Self::CaptureTrigger(_)
                | Self::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = CaptureError::format(
            "capture port",
            FirmwareError::Rejected {
                operation: "format commit",
                detail: "nope".to_owned(),
            },
        );
        assert_eq!(err.to_string(), "format negotiation failed: capture port");
        assert!(err.is_start_failure());
        assert!(!CaptureError::NotStarted.is_start_failure());
    }
}
