use crate::crc::crc16;
use crate::{ExceptionCode, FunctionCode, RequestError, ResponseError};

/// Read requests are always `[slave][function][addr hi][addr lo][qty hi][qty lo][crc lo][crc hi]`.
pub const REQUEST_FRAME_LEN: usize = 8;

/// Hard cap on any encoded frame length.
pub const MAX_FRAME_LEN: usize = 250;

/// Exception responses collapse to `[slave][function|0x80][code][crc lo][crc hi]`.
pub const EXCEPTION_FRAME_LEN: usize = 5;

/// Largest possible normal response: 125 registers or 2000 bits, plus the
/// 3-byte header and 2-byte CRC.
pub const MAX_RESPONSE_LEN: usize = 255;

/// One read request, consumed immediately by `encode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub slave_id: u8,
    pub function: FunctionCode,
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    pub fn new(
        slave_id: u8,
        function: FunctionCode,
        start_address: u16,
        quantity: u16,
    ) -> Result<Self, RequestError> {
        let max = function.max_quantity();
        if quantity == 0 || quantity > max {
            return Err(RequestError::QuantityOutOfRange { quantity, max });
        }
        Ok(Self {
            slave_id,
            function,
            start_address,
            quantity,
        })
    }

    /// Encode the 8-byte request frame, CRC appended low byte first.
    pub fn encode(&self) -> Result<[u8; REQUEST_FRAME_LEN], RequestError> {
        let len = REQUEST_FRAME_LEN;
        if len > MAX_FRAME_LEN {
            return Err(RequestError::FrameTooLong { len });
        }

        let mut frame = [0u8; REQUEST_FRAME_LEN];
        frame[0] = self.slave_id;
        frame[1] = self.function.as_u8();
        frame[2..4].copy_from_slice(&self.start_address.to_be_bytes());
        frame[4..6].copy_from_slice(&self.quantity.to_be_bytes());
        let crc = crc16(&frame[..6]);
        frame[6..8].copy_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Total frame length of the normal response to this request.
    pub fn expected_response_len(&self) -> usize {
        EXCEPTION_FRAME_LEN + self.function.response_data_len(self.quantity)
    }
}

/// Accumulates response bytes until the expected frame length is reached.
///
/// The expected length starts at the normal-response length for the request
/// and collapses to [`EXCEPTION_FRAME_LEN`] the moment the exception bit of
/// the function-code byte is observed. The transition is one-way: once
/// shortened the assembler never reverts, because the shortened frame is
/// what the slave actually sends.
#[derive(Debug)]
pub struct ResponseAssembler {
    buf: [u8; MAX_RESPONSE_LEN],
    len: usize,
    expected: usize,
    exception: bool,
}

impl ResponseAssembler {
    pub fn new(request: &ReadRequest) -> Self {
        Self {
            buf: [0u8; MAX_RESPONSE_LEN],
            len: 0,
            expected: request.expected_response_len(),
            exception: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ResponseError> {
        let end = self.len + chunk.len();
        if end > self.buf.len() {
            return Err(ResponseError::Overflow {
                expected: self.expected,
            });
        }
        self.buf[self.len..end].copy_from_slice(chunk);
        self.len = end;

        if !self.exception && self.len >= 2 && FunctionCode::is_exception(self.buf[1]) {
            self.exception = true;
            self.expected = EXCEPTION_FRAME_LEN;
        }
        Ok(())
    }

    pub fn expected_len(&self) -> usize {
        self.expected
    }

    pub fn received_len(&self) -> usize {
        self.len
    }

    pub fn is_complete(&self) -> bool {
        self.len >= self.expected
    }

    /// Validate the accumulated frame and return the payload without the
    /// trailing CRC. The CRC is verified before an exception is reported.
    pub fn finish(&self) -> Result<&[u8], ResponseError> {
        if self.len < self.expected {
            return Err(ResponseError::Incomplete {
                have: self.len,
                expected: self.expected,
            });
        }

        let frame = &self.buf[..self.expected];
        let calculated = crc16(&frame[..frame.len() - 2]);
        let received = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
        if calculated != received {
            return Err(ResponseError::CrcMismatch {
                calculated,
                received,
            });
        }

        if self.exception {
            return Err(ResponseError::Exception(ExceptionCode::from_u8(frame[2])));
        }
        Ok(&frame[..frame.len() - 2])
    }
}
