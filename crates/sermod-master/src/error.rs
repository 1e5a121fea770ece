//! Error taxonomy for the master.

use sermod_core::{ExceptionCode, RequestError, ResponseError};
use sermod_transport::TransportError;
use thiserror::Error;

/// Anything that can go wrong while connecting or executing a request.
#[derive(Debug, Error)]
pub enum MasterError {
    /// A request was issued before [`connect`](crate::RtuMaster::connect)
    /// succeeded, or after the connection was torn down.
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// No complete response arrived within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The stream ended mid-request; the device is gone.
    #[error("device lost")]
    DeviceLost,

    #[error("crc mismatch (calculated {calculated:#06x}, received {received:#06x})")]
    CrcMismatch { calculated: u16, received: u16 },

    /// The slave answered with a Modbus exception frame.
    #[error("modbus exception: {0}")]
    Exception(ExceptionCode),

    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
}

impl From<ResponseError> for MasterError {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::CrcMismatch {
                calculated,
                received,
            } => Self::CrcMismatch {
                calculated,
                received,
            },
            ResponseError::Exception(code) => Self::Exception(code),
            ResponseError::Incomplete { .. } => Self::InvalidResponse("incomplete frame"),
            ResponseError::Overflow { .. } => Self::InvalidResponse("oversized response"),
        }
    }
}

impl MasterError {
    /// Whether this error means the device itself is gone, as opposed to a
    /// single bad or missing frame.
    pub fn indicates_device_loss(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost
                | Self::Transport(TransportError::Read(_))
                | Self::Transport(TransportError::Write(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_message_carries_label() {
        let err = MasterError::Exception(ExceptionCode::from_u8(0x02));
        assert_eq!(err.to_string(), "modbus exception: Illegal Data Address (code 2)");
    }

    #[test]
    fn timeout_is_not_device_loss() {
        assert!(!MasterError::Timeout.indicates_device_loss());
        assert!(MasterError::DeviceLost.indicates_device_loss());
    }
}
