/// Heart Rate Measurement flag: value is a little-endian u16 instead of a u8
const HR_VALUE_FORMAT_U16: u8 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    pub bpm: u16,
}

/// Parses a Heart Rate Measurement (0x2A37) payload.
///
/// Only the heart rate value is read. Sensor contact, energy expended and
/// RR interval fields are left alone. Returns `None` when the payload is
/// empty or shorter than the width its flags announce.
pub fn parse_hrm(data: &[u8]) -> Option<HeartRateMeasurement> {
    let (&flags, rest) = data.split_first()?;
    let bpm = if flags & HR_VALUE_FORMAT_U16 == 0 {
        u16::from(*rest.first()?)
    } else {
        let bytes = rest.get(..2)?;
        u16::from_le_bytes([bytes[0], bytes[1]])
    };
    Some(HeartRateMeasurement { bpm })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_heart_rate() {
        assert_eq!(parse_hrm(&[0x00, 0x4B]).map(|m| m.bpm), Some(75));
    }

    #[test]
    fn u16_heart_rate() {
        assert_eq!(parse_hrm(&[0x01, 0x4B, 0x00]).map(|m| m.bpm), Some(75));
        assert_eq!(parse_hrm(&[0x01, 0x00, 0x01]).map(|m| m.bpm), Some(256));
    }

    #[test]
    fn other_flags_are_ignored() {
        // Sensor contact detected + supported, energy expended and one RR interval
        let data = [0x1E, 0x5A, 0x10, 0x00, 0x00, 0x04];
        assert_eq!(parse_hrm(&data).map(|m| m.bpm), Some(90));
    }

    #[test]
    fn short_payloads() {
        assert_eq!(parse_hrm(&[]), None);
        assert_eq!(parse_hrm(&[0x00]), None);
        assert_eq!(parse_hrm(&[0x01]), None);
        assert_eq!(parse_hrm(&[0x01, 0x4B]), None);
    }
}
