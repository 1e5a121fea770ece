//! Typed views over a validated response payload.
//!
//! A payload is the full response frame minus the trailing CRC:
//! `[slave][function][byte count][data...]`. Data starts at byte 3.

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// Register `index` of the payload, big-endian.
pub fn register_at(payload: &[u8], index: usize) -> Option<u16> {
    let offset = 3 + index.checked_mul(2)?;
    let bytes = payload.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Coil or discrete-input `index` of the payload, LSB-first within bytes.
pub fn coil_at(payload: &[u8], index: usize) -> Option<bool> {
    let byte = payload.get(3 + index / 8)?;
    Some((byte & (1u8 << (index % 8))) != 0)
}

/// All `quantity` registers in request order.
#[cfg(feature = "alloc")]
pub fn decode_registers(payload: &[u8], quantity: u16) -> Vec<u16> {
    (0..usize::from(quantity))
        .filter_map(|idx| register_at(payload, idx))
        .collect()
}

/// All `quantity` bits in request order.
#[cfg(feature = "alloc")]
pub fn decode_coils(payload: &[u8], quantity: u16) -> Vec<bool> {
    (0..usize::from(quantity))
        .filter_map(|idx| coil_at(payload, idx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{coil_at, decode_coils, decode_registers, register_at};

    const REGISTER_PAYLOAD: &[u8] = &[0x01, 0x03, 0x04, 0x00, 0x11, 0x00, 0x22];

    #[test]
    fn registers_decode_big_endian() {
        assert_eq!(register_at(REGISTER_PAYLOAD, 0), Some(0x0011));
        assert_eq!(register_at(REGISTER_PAYLOAD, 1), Some(0x0022));
        assert_eq!(register_at(REGISTER_PAYLOAD, 2), None);
        assert_eq!(decode_registers(REGISTER_PAYLOAD, 2), vec![17, 34]);
    }

    #[test]
    fn coils_decode_lsb_first() {
        let payload = [0x01, 0x01, 0x02, 0b0000_0101, 0b0000_0001];
        assert_eq!(coil_at(&payload, 0), Some(true));
        assert_eq!(coil_at(&payload, 1), Some(false));
        assert_eq!(coil_at(&payload, 2), Some(true));
        assert_eq!(coil_at(&payload, 8), Some(true));
        assert_eq!(
            decode_coils(&payload, 9),
            vec![true, false, true, false, false, false, false, false, true]
        );
    }

    #[test]
    fn decode_stops_at_payload_end() {
        let payload = [0x01, 0x01, 0x01, 0b0000_1111];
        assert_eq!(decode_coils(&payload, 9).len(), 8);
    }
}
