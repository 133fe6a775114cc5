//! IEC 61880 Video-ID decoder: a 20-bit codeword (14-bit message + 6-bit CRC) carried on lines 20
//! and 283.

use super::transition_map;
use crate::metadata::VideoParameters;

/// Decode one Video-ID line, returning the 14-bit message if its CRC passes.
pub fn decode_video_id_line(line: &[u16], params: &VideoParameters) -> Option<u16> {
    let zc_point =
        params.black16b_ire + ((params.white16b_ire - params.black16b_ire) * 35 / 100);
    let map = transition_map(line, zc_point);

    let samples_per_bit = f64::from(params.field_width) * 16.0 / 455.0;
    let mut x = f64::from(params.colour_burst_end);
    let x_limit = f64::from(params.field_width) - 22.0 * samples_per_bit;

    if !find_value(&map, true, &mut x, x_limit) {
        return None;
    }

    x += samples_per_bit * 1.5;
    if sample_at(&map, x) {
        return None;
    }

    x += samples_per_bit;
    let mut code_word: u32 = 0;
    let mut decode_count = 0;
    while (x as usize) < map.len() && decode_count < 20 {
        code_word = (code_word << 1) | u32::from(sample_at(&map, x));
        decode_count += 1;
        x += samples_per_bit;
    }
    if decode_count != 20 {
        return None;
    }

    let crcc = code_word & 0x3F;
    let message = code_word >> 6;

    let mut crc: u32 = 0b111111;
    for i in 0..14 {
        let invert = ((message >> i) & 1) ^ ((crc >> 5) & 1);
        crc ^= invert;
        crc <<= 1;
        crc += invert;
    }
    crc &= 0x3F;

    (crc == crcc).then_some(message as u16)
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
    fn test_decode_video_id_line_rejects_flat_line() {
        let params = ntsc_video_parameters();
        let line = vec![params.black16b_ire; params.field_width as usize];
        expect_that!(decode_video_id_line(&line, &params), none());
    }
}
