//! Fixture [`VideoParameters`] for NTSC and PAL, shared by tests across the crate.

use super::{System, VideoParameters};

/// A plausible NTSC [`VideoParameters`] record, subcarrier-locked at 4fSC.
pub(crate) fn ntsc_video_parameters() -> VideoParameters {
    let f_sc = 315_000_000.0 / 88.0;
    VideoParameters {
        system: System::Ntsc,
        f_sc,
        sample_rate: f_sc * 4.0,
        field_width: 910,
        field_height: 263,
        active_video_start: 122,
        active_video_end: 842,
        first_active_frame_line: 20,
        last_active_frame_line: 259,
        colour_burst_start: 96,
        colour_burst_end: 118,
        black16b_ire: 16384,
        white16b_ire: 57344,
        is_subcarrier_locked: true,
        is_mapped: false,
    }
}

/// A plausible PAL [`VideoParameters`] record, subcarrier-locked at 4fSC.
pub(crate) fn pal_video_parameters() -> VideoParameters {
    let f_sc = (1_135.0 / 4.0 + 1.0 / 625.0) * 15_625.0;
    VideoParameters {
        system: System::Pal,
        f_sc,
        sample_rate: f_sc * 4.0,
        field_width: 1135,
        field_height: 313,
        active_video_start: 186,
        active_video_end: 1066,
        first_active_frame_line: 22,
        last_active_frame_line: 309,
        colour_burst_start: 148,
        colour_burst_end: 177,
        black16b_ire: 16384,
        white16b_ire: 57344,
        is_subcarrier_locked: true,
        is_mapped: false,
    }
}
