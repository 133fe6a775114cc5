//! NTSC line-10 FM code decoder: a 40-bit biphase-like side channel carrying a 20-bit payload.

use super::transition_map;
use crate::metadata::{NtscData, VideoParameters};
use crate::util::is_even_parity;

const RECEIVER_CLOCK_SYNC: u64 = 0b0011;
const LEADING_RECOGNITION: u64 = 114;
const TRAILING_RECOGNITION: u64 = 13;

/// Decode NTSC line 10's 40-bit FM code, returning an [`NtscData`] with
/// [`NtscData::is_fm_code_data_valid`] cleared if any fixed pattern or the parity check fails.
pub fn decode_fm_code_line(line: &[u16], params: &VideoParameters) -> NtscData {
    let zc_point = ((u32::from(params.white16b_ire) + u32::from(params.black16b_ire)) / 2) as u16;
    let map = transition_map(line, zc_point);
    let cell_samples = ((params.sample_rate / 1_000_000.0) * 0.75) as usize;

    let Some(decoded) = decode_40_bits(&map, params.active_video_start as usize, cell_samples) else {
        log::debug!("FM code line did not yield 40 bits");
        return NtscData::default();
    };

    let receiver_clock_sync = (decoded & 0xF000000000) >> 36;
    let video_field_indicator = (decoded & 0x0800000000) >> 35;
    let leading_recognition = (decoded & 0x07F0000000) >> 28;
    let data_value = (decoded & 0x000FFFFF00) >> 8;
    let data_parity_bit = (decoded & 0x0000000080) >> 7;
    let trailing_recognition = decoded & 0x000000007F;

    if receiver_clock_sync != RECEIVER_CLOCK_SYNC
        || leading_recognition != LEADING_RECOGNITION
        || trailing_recognition != TRAILING_RECOGNITION
    {
        log::debug!("FM code fixed pattern mismatch");
        return NtscData::default();
    }

    let even_parity = is_even_parity(data_value, 20);
    // `dataParityBit == 1` means "odd parity expected" (even bit-count of the payload flips the
    // stored bit), matching the spec's "parity bit is odd iff the payload has even parity".
    if (data_parity_bit == 1) != even_parity {
        log::debug!("FM code parity check failed");
        return NtscData::default();
    }

    NtscData {
        is_fm_code_data_valid: true,
        fm_code_data: Some(data_value as u32),
        field_flag: video_field_indicator == 1,
        white_flag: false,
        video_id_data: None,
    }
}

/// Walk the transition map looking for exactly 40 biphase-like cells, each either transitioning
/// mid-cell (a `1` bit) or not (a `0` bit), per the original FM-code clock-recovery loop.
fn decode_40_bits(map: &[bool], start: usize, cell_samples: usize) -> Option<u64> {
    let mut x = start;
    while x < map.len() && !map[x] {
        x += 1;
    }
    if x >= map.len() {
        return None;
    }

    let mut decoded: u64 = 0;
    let mut decode_count = 0;
    let mut last_transition_x = x;
    let mut last_state = map[x];

    while x < map.len() && decode_count < 40 {
        while x < map.len() && map[x] == last_state {
            x += 1;
        }
        if x >= map.len() {
            break;
        }
        last_state = map[x];

        if x - last_transition_x < cell_samples {
            decoded = (decoded << 1) | 1;
            last_transition_x = x;
            decode_count += 1;

            while x < map.len() && map[x] == last_state {
                x += 1;
            }
            if x >= map.len() {
                break;
            }
            last_state = map[x];
            last_transition_x = x;
        } else {
            decoded <<= 1;
            last_transition_x = x;
            decode_count += 1;
        }
        x += 1;
    }

    (decode_count == 40).then_some(decoded)
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;
    use crate::metadata::testutil::ntsc_video_parameters;

    #[googletest::test]
    fn test_decode_fm_code_line_rejects_flat_line() {
        let params = ntsc_video_parameters();
        let line = vec![params.black16b_ire; params.field_width as usize];
        let ntsc = decode_fm_code_line(&line, &params);
        expect_that!(ntsc.is_fm_code_data_valid, eq(false));
    }
}
