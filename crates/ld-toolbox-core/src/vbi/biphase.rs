//! Biphase (Manchester) decoder for VBI lines 16-18: the picture-number/timecode/chapter carrier
//! used by IEC 60857 LaserDiscs.

use snafu::Snafu;

use super::{find_transition, transition_map};
use crate::metadata::{DecodedVbi, DiscType, VbiData, VideoParameters};

/// Bit clock for the biphase carrier: one cell is 2us, sampled 1.5 cells after each transition.
const BIT_CLOCK_US: f64 = 2.0;
const SAMPLE_OFFSET_US: f64 = 1.5;

/// A biphase line failed to decode a full 24-bit word.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("biphase decode got {bits} bits, expected 24"))]
pub struct BiphaseDecodeError {
    /// Number of bits actually decoded before transitions ran out.
    pub bits: u32,
}

/// Decode one VBI line's 24-bit biphase (Manchester) word.
///
/// Finds the first transition at or after `active_video_start`, emits a `1` for it, then repeats:
/// step forward 1.5 cell-widths, find the next transition, and emit `1` for a low-to-high edge or
/// `0` for high-to-low. Fails unless exactly 24 bits are recovered.
fn decode_biphase_line(
    line: &[u16],
    zc_point: u16,
    params: &VideoParameters,
) -> Result<u32, BiphaseDecodeError> {
    let map = transition_map(line, zc_point);
    let jump_samples = ((params.sample_rate / 1_000_000.0) * SAMPLE_OFFSET_US) as usize;

    let mut x = params.active_video_start as usize;
    while x < map.len() && !map[x] {
        x += 1;
    }
    if x >= map.len() {
        return BiphaseDecodeSnafu { bits: 0u32 }.fail();
    }

    let mut result: u32 = 1;
    let mut bits: u32 = 1;
    loop {
        x += jump_samples;
        if x >= map.len() {
            break;
        }
        let start_state = map[x];
        while x < map.len() && map[x] == start_state {
            x += 1;
        }
        if x >= map.len() {
            break;
        }
        result = (result << 1) | u32::from(map[x]);
        bits += 1;
    }

    if bits != 24 {
        return BiphaseDecodeSnafu { bits }.fail();
    }
    Ok(result)
}

/// Decode the three biphase-carrying lines (16, 17, 18) of a field, writing the raw 24-bit words
/// into a [`VbiData`] record. `in_use` is set if at least one line decoded successfully.
pub fn decode_biphase_field(
    line16: &[u16],
    line17: &[u16],
    line18: &[u16],
    params: &VideoParameters,
) -> VbiData {
    let zc_point = ((u32::from(params.white16b_ire) + u32::from(params.black16b_ire)) / 2) as u16;
    let mut vbi_data = [0u32; 3];
    let mut in_use = false;
    for (slot, line) in vbi_data.iter_mut().zip([line16, line17, line18]) {
        if let Ok(word) = decode_biphase_line(line, zc_point, params) {
            *slot = word;
            in_use = true;
        } else {
            log::debug!("biphase decode failed for one VBI line");
        }
    }
    VbiData { vbi_data, in_use }
}

const LEAD_IN: u32 = 0x88FFFF;
const LEAD_OUT: u32 = 0x80EEEE;
const PICTURE_STOP: u32 = 0x82CFFF;
const CLV_INDICATOR: u32 = 0x87FFFF;

/// Interpret the raw VBI triplet (see [`decode_biphase_field`]) as the composite 24-bit-word
/// fields defined by IEC 60857-1986 section 10.1.
pub fn interpret_vbi(vbi: &VbiData) -> DecodedVbi {
    let [vbi16, vbi17, vbi18] = vbi.vbi_data;
    let mut decoded = DecodedVbi { disc_type: Some(DiscType::Cav), ..Default::default() };

    decoded.lead_in = vbi17 == LEAD_IN || vbi18 == LEAD_IN;
    decoded.lead_out = vbi17 == LEAD_OUT || vbi18 == LEAD_OUT;
    decoded.picture_stop = vbi16 == PICTURE_STOP || vbi17 == PICTURE_STOP;

    decoded.picture_number = [vbi17, vbi18]
        .into_iter()
        .find(|&w| w & 0xF00000 == 0xF00000)
        .map(|w| w & 0x07FFFF)
        .map(bcd_to_u32_5)
        .filter(|&n| n > 0 && n < 80_000);

    decoded.chapter_number = [vbi17, vbi18]
        .into_iter()
        .find(|&w| w & 0xF00FFF == 0x800DDD)
        .map(|w| (w & 0x07F000) >> 12)
        .map(bcd_to_u32_2);

    let time_code_hr_min = [vbi17, vbi18].into_iter().find(|&w| w & 0xF0FF00 == 0xF0DD00).map(|w| {
        let hr = (w & 0x0F0000) >> 16;
        let min = bcd_to_u32_2(w & 0x0000FF);
        ((hr & 0xF) as u8, min as u8)
    });

    if vbi17 == CLV_INDICATOR {
        decoded.disc_type = Some(DiscType::Clv);
    }

    if vbi16 & 0xFFF000 == 0x8DC000 || vbi16 & 0xFFF000 == 0x8BA000 {
        let x3 = (vbi16 & 0x000F00) >> 8;
        let x4 = (vbi16 & 0x0000F0) >> 4;
        let x5 = vbi16 & 0x00000F;
        let x4 = hamming_correct(x4, x5);
        decoded.programme_status_code = Some(((x3 << 8) | (x4 << 4) | x5) as u16);
    }

    if vbi16 & 0xF0F000 == 0x80D000 {
        let x1 = (vbi16 & 0x0F0000) >> 16;
        let x3x4x5 = vbi16 & 0x000FFF;
        decoded.user_code = Some((x1 << 12) | x3x4x5);
    }

    let clv_sec_pic = (vbi16 & 0xF0F000 == 0x80E000).then(|| {
        let x1 = (vbi16 & 0x0F0000) >> 16;
        let x3 = (vbi16 & 0x000F00) >> 8;
        let x4 = (vbi16 & 0x0000F0) >> 4;
        let x5 = vbi16 & 0x00000F;
        let sec = (x1 as i32 - 10) * 10 + x3 as i32;
        let pic_no = x4 * 10 + x5;
        (sec.max(0) as u8, pic_no as u8)
    });
    decoded.clv_picture_number = clv_sec_pic.map(|(_, pic_no)| pic_no);

    decoded.clv_programme_time_code = time_code_hr_min.map(|(hr, min)| {
        let sec = clv_sec_pic.map(|(sec, _)| sec).unwrap_or(0);
        (hr, min, sec)
    });

    decoded
}

fn bcd_to_u32_5(value: u32) -> u32 {
    10_000 * ((value & 0xF0000) >> 16)
        + 1_000 * ((value & 0x0F000) >> 12)
        + 100 * ((value & 0x00F00) >> 8)
        + 10 * ((value & 0x000F0) >> 4)
        + (value & 0x0000F)
}

fn bcd_to_u32_2(value: u32) -> u32 {
    10 * ((value & 0xF0) >> 4) + (value & 0x0F)
}

/// Hamming(7,4) parity check/correction for the programme status code's `x4` nibble, keyed by
/// check bits derived from `x5`. Returns `x4` unmodified if the parity check passes, or the
/// single-bit-corrected value otherwise.
fn hamming_correct(x4: u32, x5: u32) -> u32 {
    let u = [
        (x5 >> 1) & 1,
        (x5 >> 2) & 1,
        (x5 >> 3) & 1,
        (x4) & 1,
        (x4 >> 1) & 1,
        (x4 >> 2) & 1,
        (x4 >> 3) & 1,
    ];
    let c1 = u[6] ^ u[4] ^ u[2] ^ u[0];
    let c2 = u[5] ^ u[4] ^ u[1] ^ u[0];
    let c3 = u[3] ^ u[2] ^ u[1] ^ u[0];
    let c = c3 * 4 + c2 * 2 + c1;
    if c == 0 {
        return x4;
    }
    let mut u = u;
    let bit = (7 - c) as usize;
    u[bit] ^= 1;
    (u[3]) | (u[4] << 1) | (u[5] << 2) | (u[6] << 3)
}

/// Infer field order (even-then-odd vs odd-then-even) from the first field carrying a valid CAV
/// picture number or CLV programme time code.
///
/// `fields` is an iterator of `(is_even, decoded)` pairs in capture order; returns `true` if the
/// disc's field order is even-then-odd, or `None` if no field settled the question.
pub fn infer_field_order<'a, I>(fields: I) -> Option<bool>
where
    I: IntoIterator<Item = (bool, &'a DecodedVbi)>,
{
    for (is_even, decoded) in fields {
        let settled = match decoded.disc_type {
            Some(DiscType::Cav) => decoded.picture_number.is_some(),
            Some(DiscType::Clv) => decoded.clv_programme_time_code.is_some(),
            None => false,
        };
        if settled {
            return Some(is_even);
        }
    }
    None
}
