//! Vertical-blanking-interval line decoders: biphase (Manchester) timecode/picture-number data on
//! lines 16-18, NTSC line-10 FM code, CEA-608 closed captions, VITC, IEC 61880 Video-ID, and
//! white-flag detection.
//!
//! Every decoder here shares one piece of preprocessing — [`transition_map`] — and otherwise
//! operates independently: a failure in one decoder never prevents another from running on the
//! same field, matching §7's "per-line VBI decode failures are silent".

mod biphase;
mod cea608;
mod fm_code;
mod video_id;
mod vitc;
mod white_flag;

pub use biphase::{decode_biphase_field, infer_field_order, interpret_vbi, BiphaseDecodeError};
pub use cea608::decode_cea608_line;
pub use fm_code::decode_fm_code_line;
pub use video_id::decode_video_id_line;
pub use vitc::{decode_vitc_field, vitc_candidate_lines};
pub use white_flag::is_white_flag_line;

/// Turn one line of 16-bit samples into a boolean "is the signal above `zc_point`" vector, with a
/// three-sample debouncer: the output only flips state after three consecutive samples agree on
/// the opposite polarity, rejecting single-sample noise spikes that would otherwise look like
/// clock edges to the decoders built on top of this map.
pub(crate) fn transition_map(line: &[u16], zc_point: u16) -> Vec<bool> {
    let mut map = Vec::with_capacity(line.len());
    let Some(&first) = line.first() else {
        return map;
    };
    let mut state = first > zc_point;
    let mut opposite_run = 0u8;
    for &sample in line {
        let above = sample > zc_point;
        if above == state {
            opposite_run = 0;
        } else {
            opposite_run += 1;
            if opposite_run == 3 {
                state = above;
                opposite_run = 0;
            }
        }
        map.push(state);
    }
    map
}

/// The index of the first sample at or after `from` where `map` changes state, if any.
pub(crate) fn find_transition(map: &[bool], from: usize) -> Option<usize> {
    if from >= map.len() {
        return None;
    }
    (from + 1..map.len()).find(|&i| map[i] != map[i - 1])
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn test_transition_map_rejects_single_sample_spike() {
        let line = vec![0u16, 0, 0, 100, 0, 0, 0, 0];
        let map = transition_map(&line, 50);
        // The lone sample above zc_point must not flip the debounced state.
        expect_that!(map, each(eq(false)));
    }

    #[googletest::test]
    fn test_transition_map_flips_after_three_samples() {
        let line = vec![0u16, 0, 0, 100, 100, 100, 100, 100];
        let map = transition_map(&line, 50);
        expect_that!(map, elements_are![
            eq(false), eq(false), eq(false), eq(false), eq(false), eq(true), eq(true), eq(true)
        ]);
    }

    #[googletest::test]
    fn test_find_transition() {
        let map = vec![false, false, true, true, false];
        expect_that!(find_transition(&map, 0), some(eq(2)));
        expect_that!(find_transition(&map, 2), some(eq(4)));
        expect_that!(find_transition(&map, 4), none());
    }
}
