//! Master-side Modbus RTU wire logic in pure Rust.
//!
//! `sermod-core` builds read-request frames, assembles and validates
//! variable-length responses (including the shortened exception form) and
//! decodes register and coil payloads. It performs no I/O and is
//! `no_std`-compatible.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod crc;
pub mod decode;
pub mod error;
pub mod exception;
pub mod frame;
pub mod function;

pub use crc::crc16;
pub use error::{RequestError, ResponseError};
pub use exception::ExceptionCode;
pub use frame::{ReadRequest, ResponseAssembler, MAX_FRAME_LEN, REQUEST_FRAME_LEN};
pub use function::FunctionCode;
