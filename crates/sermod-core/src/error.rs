use crate::ExceptionCode;
use core::fmt;

/// Errors raised while constructing an outbound request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestError {
    UnsupportedFunction(u8),
    QuantityOutOfRange { quantity: u16, max: u16 },
    FrameTooLong { len: usize },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFunction(code) => {
                write!(f, "unsupported function code 0x{code:02X}")
            }
            Self::QuantityOutOfRange { quantity, max } => {
                write!(f, "quantity {quantity} out of range (1..={max})")
            }
            Self::FrameTooLong { len } => {
                write!(f, "frame too long ({len} bytes)")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RequestError {}

/// Errors raised while assembling or validating an inbound response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResponseError {
    Incomplete { have: usize, expected: usize },
    Overflow { expected: usize },
    CrcMismatch { calculated: u16, received: u16 },
    Exception(ExceptionCode),
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete { have, expected } => {
                write!(f, "incomplete frame ({have} of {expected} bytes)")
            }
            Self::Overflow { expected } => {
                write!(f, "more than {expected} bytes received")
            }
            Self::CrcMismatch {
                calculated,
                received,
            } => write!(
                f,
                "crc mismatch (calculated 0x{calculated:04X}, received 0x{received:04X})"
            ),
            Self::Exception(code) => write!(f, "modbus exception: {code}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ResponseError {}
