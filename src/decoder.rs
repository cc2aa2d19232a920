//! Heart Rate Measurement (0x2A37) decoding.
//!
//! Byte 0 is a flags field. Bit 0 selects the value format: clear means a `u8` in byte 1,
//! set means a little-endian `u16` in bytes 1..3. Sensor contact, energy expended and RR
//! intervals follow but are not parsed.

use crate::error::DecodeError;

const RATE_U16: u8 = 1 << 0;


/// Beats per minute carried by a Heart Rate Measurement value.
pub fn decode_heart_rate(value: &[u8]) -> Result<u16, DecodeError> {
    let Some(&flags) = value.first() else {
        return Err(DecodeError::MalformedPayload { needed: 2, actual: 0 });
    };

    let needed = if flags & RATE_U16 == 0 { 2 } else { 3 };
    if value.len() < needed {
        return Err(DecodeError::MalformedPayload { needed, actual: value.len() });
    }

    let heart_rate = if flags & RATE_U16 == 0 {
        u16::from(value[1])
    } else {
        u16::from_le_bytes([value[1], value[2]])
    };

    Ok(heart_rate)
}


#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn eight_bit_value() {
        assert_eq!(decode_heart_rate(&[0x00, 0x4B]), Ok(75));
    }

    #[test]
    fn sixteen_bit_value() {
        assert_eq!(decode_heart_rate(&[0x01, 0x46, 0x00]), Ok(70));
        assert_eq!(decode_heart_rate(&[0x01, 0xFF, 0x00]), Ok(255));
        assert_eq!(decode_heart_rate(&[0x01, 0x2C, 0x01]), Ok(300));
    }

    #[test]
    fn trailing_fields_are_ignored() {
        // contact detected + energy expended + one RR interval
        let value = [0x1E, 0x48, 0x10, 0x00, 0x00, 0x04];
        assert_eq!(decode_heart_rate(&value), Ok(72));
    }

    #[test]
    fn truncated_sixteen_bit_value_is_rejected() {
        assert_eq!(
            decode_heart_rate(&[0x01, 0x46]),
            Err(DecodeError::MalformedPayload { needed: 3, actual: 2 })
        );
    }

    #[test]
    fn empty_and_flags_only_are_rejected() {
        assert_eq!(
            decode_heart_rate(&[]),
            Err(DecodeError::MalformedPayload { needed: 2, actual: 0 })
        );
        assert!(decode_heart_rate(&[0x00]).is_err());
    }

    proptest! {
        #[test]
        fn decoding_is_total(value in prop::collection::vec(any::<u8>(), 0..8)) {
            let needed = 2 + usize::from(value.first().map_or(0, |flags| flags & RATE_U16));

            match decode_heart_rate(&value) {
                Ok(heart_rate) => {
                    prop_assert!(value.len() >= needed);
                    if needed == 2 {
                        prop_assert_eq!(heart_rate, u16::from(value[1]));
                    }
                }
                Err(DecodeError::MalformedPayload { needed: reported, actual }) => {
                    prop_assert!(value.len() < needed);
                    prop_assert_eq!(reported, needed);
                    prop_assert_eq!(actual, value.len());
                }
            }
        }
    }
}
