//! White-flag detection: a simple majority-of-active-samples threshold, not a clocked decoder.

use crate::metadata::VideoParameters;

/// Mark a line as a white flag if at least half its active-video samples exceed the midpoint
/// between the black and white IRE anchors.
pub fn is_white_flag_line(line: &[u16], params: &VideoParameters) -> bool {
    let zc_point = (u32::from(params.white16b_ire) + u32::from(params.black16b_ire)) / 2;
    let start = params.active_video_start as usize;
    let end = params.active_video_end as usize;
    let active = &line[start.min(line.len())..end.min(line.len())];
    let white_count = active.iter().filter(|&&s| u32::from(s) > zc_point).count();
    white_count * 2 > active.len()
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;
    use crate::metadata::testutil::ntsc_video_parameters;

    #[googletest::test]
    fn test_all_white_is_flagged() {
        let params = ntsc_video_parameters();
        let line = vec![params.white16b_ire; params.field_width as usize];
        expect_that!(is_white_flag_line(&line, &params), eq(true));
    }

    #[googletest::test]
    fn test_all_black_is_not_flagged() {
        let params = ntsc_video_parameters();
        let line = vec![params.black16b_ire; params.field_width as usize];
        expect_that!(is_white_flag_line(&line, &params), eq(false));
    }
}
