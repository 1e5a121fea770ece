use crate::RequestError;

pub(crate) const MAX_READ_BITS: u16 = 2000;
pub(crate) const MAX_READ_REGISTERS: u16 = 125;

/// Read function codes supported by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, RequestError> {
        match value {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            other => Err(RequestError::UnsupportedFunction(other)),
        }
    }

    pub const fn is_exception(value: u8) -> bool {
        (value & 0x80) != 0
    }

    /// True for the single-bit functions (coils, discrete inputs).
    pub const fn is_bit_function(self) -> bool {
        matches!(self, Self::ReadCoils | Self::ReadDiscreteInputs)
    }

    pub const fn max_quantity(self) -> u16 {
        if self.is_bit_function() {
            MAX_READ_BITS
        } else {
            MAX_READ_REGISTERS
        }
    }

    /// Data bytes a normal response carries for `quantity` points.
    pub const fn response_data_len(self, quantity: u16) -> usize {
        if self.is_bit_function() {
            (quantity as usize).div_ceil(8)
        } else {
            quantity as usize * 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FunctionCode;
    use crate::RequestError;

    #[test]
    fn parses_read_codes() {
        assert_eq!(
            FunctionCode::from_u8(0x03).unwrap(),
            FunctionCode::ReadHoldingRegisters
        );
        assert_eq!(FunctionCode::from_u8(0x01).unwrap(), FunctionCode::ReadCoils);
    }

    #[test]
    fn rejects_write_and_exception_codes() {
        assert_eq!(
            FunctionCode::from_u8(0x06).unwrap_err(),
            RequestError::UnsupportedFunction(0x06)
        );
        assert_eq!(
            FunctionCode::from_u8(0x83).unwrap_err(),
            RequestError::UnsupportedFunction(0x83)
        );
    }

    #[test]
    fn exception_bit_is_detected() {
        assert!(FunctionCode::is_exception(0x83));
        assert!(!FunctionCode::is_exception(0x03));
    }

    #[test]
    fn response_data_len_per_function() {
        assert_eq!(FunctionCode::ReadHoldingRegisters.response_data_len(2), 4);
        assert_eq!(FunctionCode::ReadCoils.response_data_len(8), 1);
        assert_eq!(FunctionCode::ReadCoils.response_data_len(9), 2);
        assert_eq!(FunctionCode::ReadDiscreteInputs.response_data_len(2000), 250);
    }
}
