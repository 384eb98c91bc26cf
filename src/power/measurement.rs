use super::cadence::CrankRevolutions;

// Cycling Power Measurement flags, only the ones that move the crank block
const PEDAL_POWER_BALANCE_PRESENT: u16 = 1 << 0;
const ACCUMULATED_TORQUE_PRESENT: u16 = 1 << 2;
const WHEEL_REVOLUTION_DATA_PRESENT: u16 = 1 << 4;
const CRANK_REVOLUTION_DATA_PRESENT: u16 = 1 << 5;

/// Flags (2) + instantaneous power (2)
const MINIMUM_LENGTH: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CyclingPowerMeasurement {
    pub instantaneous_watts: u16,
    pub crank: Option<CrankRevolutions>,
}

/// Parses a Cycling Power Measurement (0x2A63) payload.
///
/// Payloads shorter than the mandatory fields decode as 0 W with no crank
/// data. Negative power means "no reading" and is clamped to 0.
pub fn parse_cycling_power(data: &[u8]) -> CyclingPowerMeasurement {
    if data.len() < MINIMUM_LENGTH {
        return CyclingPowerMeasurement::default();
    }

    let flags = u16::from_le_bytes([data[0], data[1]]);
    let raw_power = i16::from_le_bytes([data[2], data[3]]);
    let instantaneous_watts = raw_power.max(0) as u16;

    let crank = if flags & CRANK_REVOLUTION_DATA_PRESENT != 0 {
        parse_crank_block(data, crank_offset(flags))
    } else {
        None
    };

    CyclingPowerMeasurement {
        instantaneous_watts,
        crank,
    }
}

/// Byte offset of the crank revolution block, which follows whichever
/// optional fields the flags say are present.
fn crank_offset(flags: u16) -> usize {
    let mut offset = MINIMUM_LENGTH;
    if flags & PEDAL_POWER_BALANCE_PRESENT != 0 {
        offset += 1;
    }
    if flags & ACCUMULATED_TORQUE_PRESENT != 0 {
        offset += 2;
    }
    if flags & WHEEL_REVOLUTION_DATA_PRESENT != 0 {
        // u32 cumulative wheel revolutions + u16 last wheel event time
        offset += 6;
    }
    offset
}

fn parse_crank_block(data: &[u8], offset: usize) -> Option<CrankRevolutions> {
    let block = data.get(offset..offset + 4)?;
    Some(CrankRevolutions {
        cumulative_revolutions: u16::from_le_bytes([block[0], block[1]]),
        last_event_time: u16::from_le_bytes([block[2], block[3]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_power_is_clamped() {
        let measurement = parse_cycling_power(&[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(measurement.instantaneous_watts, 0);
        assert_eq!(measurement.crank, None);
    }

    #[test]
    fn power_only() {
        // 250 W
        let measurement = parse_cycling_power(&[0x00, 0x00, 0xFA, 0x00]);
        assert_eq!(measurement.instantaneous_watts, 250);
        assert_eq!(measurement.crank, None);
    }

    #[test]
    fn too_short() {
        assert_eq!(
            parse_cycling_power(&[0x20, 0x00, 0xFA]),
            CyclingPowerMeasurement::default()
        );
        assert_eq!(parse_cycling_power(&[]), CyclingPowerMeasurement::default());
    }

    #[test]
    fn crank_block_directly_after_power() {
        // Crank present, 300 W, 1234 revs, event time 0x0800
        let data = [0x20, 0x00, 0x2C, 0x01, 0xD2, 0x04, 0x00, 0x08];
        let measurement = parse_cycling_power(&data);
        assert_eq!(measurement.instantaneous_watts, 300);
        assert_eq!(
            measurement.crank,
            Some(CrankRevolutions {
                cumulative_revolutions: 1234,
                last_event_time: 0x0800,
            })
        );
    }

    #[test]
    fn crank_block_after_every_optional_field() {
        // Balance + torque + wheel + crank
        let flags: u16 = 0x0001 | 0x0004 | 0x0010 | 0x0020;
        let mut data = flags.to_le_bytes().to_vec();
        data.extend_from_slice(&200i16.to_le_bytes());
        data.push(50); // pedal balance
        data.extend_from_slice(&[0x10, 0x00]); // torque
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]); // wheel
        data.extend_from_slice(&7u16.to_le_bytes());
        data.extend_from_slice(&1024u16.to_le_bytes());

        let measurement = parse_cycling_power(&data);
        assert_eq!(measurement.instantaneous_watts, 200);
        assert_eq!(
            measurement.crank,
            Some(CrankRevolutions {
                cumulative_revolutions: 7,
                last_event_time: 1024,
            })
        );
    }

    #[test]
    fn torque_without_crank_flag_is_not_read_as_crank() {
        let data = [0x04, 0x00, 0x64, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x04];
        let measurement = parse_cycling_power(&data);
        assert_eq!(measurement.instantaneous_watts, 100);
        assert_eq!(measurement.crank, None);
    }

    #[test]
    fn truncated_crank_block() {
        // Flags say crank + wheel data, but the wheel data eats the payload
        let data = [0x30, 0x00, 0x64, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let measurement = parse_cycling_power(&data);
        assert_eq!(measurement.instantaneous_watts, 100);
        assert_eq!(measurement.crank, None);
    }
}
