//! Vertical-interval timecode (VITC) decoder.
//!
//! References: ITU-R BR.780-2 and SMPTE ST 12-1:2008.

use super::transition_map;
use crate::metadata::{System, VideoParameters, VitcData};

/// 1-based frame line numbers likely to carry VITC, in priority order (the standards' recommended
/// lines first, prioritising lines that don't clash with LaserDisc VBI, then the rest of the
/// permitted range).
pub fn vitc_candidate_lines(system: System) -> &'static [u32] {
    match system {
        System::Pal => &[21, 19, 18, 20, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 22],
        System::Ntsc => &[14, 12, 16, 18, 10, 11, 13, 15, 17, 19, 20],
    }
}

/// Try each of [`vitc_candidate_lines`] in turn (via `get_line`, which should return `None` for a
/// line outside the field), returning the first one whose CRC passes.
pub fn decode_vitc_field<'a>(
    params: &VideoParameters,
    get_line: impl Fn(u32) -> Option<&'a [u16]>,
) -> VitcData {
    for &line_no in vitc_candidate_lines(params.system) {
        if let Some(line) = get_line(line_no) {
            if let Some(data) = decode_vitc_line(line, params) {
                return VitcData { data, in_use: true };
            }
        }
    }
    VitcData { data: [0; 8], in_use: false }
}

fn decode_vitc_line(line: &[u16], params: &VideoParameters) -> Option<[u8; 8]> {
    // 40 IRE above black is approximately the midpoint between the VITC 0 and 1 levels.
    let zc_point =
        params.black16b_ire + ((40 * (params.white16b_ire - params.black16b_ire)) / 100);
    let map = transition_map(line, zc_point);

    let bit_samples = f64::from(params.field_width) / 115.0;
    let mut byte_start = f64::from(params.colour_burst_end);
    let mut byte_start_limit = line.len() as f64 - 90.0 * bit_samples;

    if !find_value(&map, false, &mut byte_start, byte_start_limit) {
        return None;
    }
    if !find_value(&map, true, &mut byte_start, byte_start_limit) {
        return None;
    }

    let mut vitc_data = [0i32; 9];
    let mut crc_data = [0i32; 12];
    let mut bit_count = 0usize;

    for byte_num in 0..9 {
        byte_start += bit_samples * 0.5;
        byte_start_limit += 10.0 * bit_samples;
        if !find_value(&map, false, &mut byte_start, byte_start_limit) {
            return None;
        }
        byte_start -= bit_samples;

        for i in 0..10 {
            let bit = sample_at(&map, byte_start + (i as f64 + 0.5) * bit_samples) as i32;
            vitc_data[byte_num] |= bit << i;
            crc_data[bit_count / 8] |= bit << (bit_count % 8);
            bit_count += 1;
        }

        if vitc_data[byte_num] & 3 != 1 {
            return None;
        }
        vitc_data[byte_num] >>= 2;

        byte_start += 10.0 * bit_samples;
    }

    let crc_total = crc_data.iter().fold(0, |acc, &v| acc ^ v);
    if crc_total != 0 {
        return None;
    }

    let mut out = [0u8; 8];
    for (o, &v) in out.iter_mut().zip(vitc_data.iter()) {
        *o = v as u8;
    }
    Some(out)
}

fn sample_at(map: &[bool], x: f64) -> bool {
    map.get(x as usize).copied().unwrap_or(false)
}

fn find_value(map: &[bool], want: bool, position: &mut f64, limit: f64) -> bool {
    while *position < limit {
        if sample_at(map, *position) == want {
            return true;
        }
        *position += 1.0;
    }
    false
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;
    use crate::metadata::testutil::ntsc_video_parameters;

    #[googletest::test]
    fn test_decode_vitc_field_no_candidate_lines_present() {
        let params = ntsc_video_parameters();
        let vitc = decode_vitc_field(&params, |_| None);
        expect_that!(vitc.in_use, eq(false));
    }

    #[googletest::test]
    fn test_decode_vitc_line_rejects_flat_line() {
        let params = ntsc_video_parameters();
        let line = vec![params.black16b_ire; params.field_width as usize];
        expect_that!(decode_vitc_line(&line, &params), none());
    }
}
