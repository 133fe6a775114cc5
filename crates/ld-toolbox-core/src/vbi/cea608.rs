//! CEA-608 (line 21) closed-caption decoder.
//!
//! References: ANSI/CTA-608-E "Line 21 Data Services".

use super::transition_map;
use crate::metadata::{ClosedCaptionData, VideoParameters};
use crate::util::is_even_parity;

/// Decode one CEA-608 line-21 line into up to two independently-validated 7-bit characters.
pub fn decode_cea608_line(line: &[u16], params: &VideoParameters) -> ClosedCaptionData {
    // The zero-crossing point is 25 IRE above black.
    let zc_point = params.black16b_ire + ((params.white16b_ire - params.black16b_ire) / 4);
    let map = transition_map(line, zc_point);

    let samples_per_bit = f64::from(params.field_width) / 32.0;
    let mut x = f64::from(params.colour_burst_end) + 2.0 * samples_per_bit;
    let x_limit = f64::from(params.field_width) - 17.0 * samples_per_bit;
    let mut last_one = x;

    while x - last_one < 1.5 * samples_per_bit {
        if x >= x_limit {
            log::debug!("CEA-608 start bits not found (00)");
            return ClosedCaptionData { data0: None, data1: None, in_use: false };
        }
        if sample_at(&map, x) {
            last_one = x;
        }
        x += 1.0;
    }

    if !find_value(&map, true, &mut x, x_limit) {
        log::debug!("CEA-608 start bits not found (1)");
        return ClosedCaptionData { data0: None, data1: None, in_use: false };
    }

    x += 1.5 * samples_per_bit;

    let (byte0, parity0) = read_byte(&map, &mut x, samples_per_bit);
    let (byte1, parity1) = read_byte(&map, &mut x, samples_per_bit);

    let mut caption = ClosedCaptionData { data0: None, data1: None, in_use: false };
    // This mirrors the original's parity gate exactly: a byte is rejected only when it has even
    // bit-count AND its sampled parity bit isn't 1 (odd-parity data with a mismatched bit is not
    // separately caught).
    if !(is_even_parity(u64::from(byte0), 7) && parity0 != 1) {
        caption.data0 = Some(byte0);
        caption.in_use = true;
    } else {
        log::debug!("CEA-608 first byte failed parity check");
    }
    if !(is_even_parity(u64::from(byte1), 7) && parity1 != 1) {
        caption.data1 = Some(byte1);
        caption.in_use = true;
    } else {
        log::debug!("CEA-608 second byte failed parity check");
    }
    caption
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

fn read_byte(map: &[bool], x: &mut f64, samples_per_bit: f64) -> (u8, u8) {
    let mut byte = 0u8;
    for _ in 0..7 {
        byte >>= 1;
        if sample_at(map, *x) {
            byte += 64;
        }
        *x += samples_per_bit;
    }
    let parity = if sample_at(map, *x) { 1 } else { 0 };
    *x += samples_per_bit;
    (byte, parity)
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;
    use crate::metadata::testutil::ntsc_video_parameters;

    #[googletest::test]
    fn test_decode_cea608_line_no_signal_rejected() {
        let params = ntsc_video_parameters();
        let line = vec![params.black16b_ire; params.field_width as usize];
        let caption = decode_cea608_line(&line, &params);
        expect_that!(caption.in_use, eq(false));
        expect_that!(caption.data0, none());
        expect_that!(caption.data1, none());
    }
}
