//! Synthetic PAL/NTSC composite encoder: the test oracle for the chroma decoder.
//!
//! Given a stream of 16-bit linear RGB frames, [`Encoder`] synthesizes a TBC-format composite
//! field pair per frame (plus the [`FieldMetadata`] the decoder needs to interpret them,
//! principally `field_phase_id`). The forward math here is the exact inverse of
//! [`crate::chroma::comb`]'s `split_iq`/`adjust_y`: a pure-tone chroma signal at the column phase
//! this module writes decodes back to the same I/Q this module started from.

use crate::chroma::{cos4fsc, line_phase, sin4fsc};
use crate::filter::Fir;
use crate::metadata::{FieldMetadata, System, ValidVideoParameters};

/// One 16-bit-per-channel linear RGB sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb16 {
    /// Red channel.
    pub r: u16,
    /// Green channel.
    pub g: u16,
    /// Blue channel.
    pub b: u16,
}

/// Active-picture RGB source for one frame, in frame-line (not field-line) reading order: row 0
/// is the first active frame line, row `height - 1` the last.
#[derive(Debug, Clone, Copy)]
pub struct FrameRgb<'a> {
    /// Samples per row; must equal `active_video_end - active_video_start`.
    pub width: usize,
    /// `width * height` samples, row-major.
    pub samples: &'a [Rgb16],
}

impl FrameRgb<'_> {
    /// Number of rows, derived from `samples.len() / width`.
    pub fn height(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.samples.len() / self.width
        }
    }

    fn row(&self, line: usize) -> &[Rgb16] {
        &self.samples[line * self.width..(line + 1) * self.width]
    }
}

/// One encoded frame: two fields' raw samples plus their metadata, ready for
/// [`crate::field_io::FieldWriter`] and [`crate::metadata::MetadataStore`].
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Raw samples of the first field, `field_width * field_height` long.
    pub first_field: Vec<u16>,
    /// Raw samples of the second field, `field_width * field_height` long.
    pub second_field: Vec<u16>,
    /// Metadata for [`EncodedFrame::first_field`].
    pub first_field_metadata: FieldMetadata,
    /// Metadata for [`EncodedFrame::second_field`].
    pub second_field_metadata: FieldMetadata,
}

/// Which sync pulse shape occupies one half-line slot of a frame line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncKind {
    /// No pulse in this half-line slot (the second slot of an ordinary active-video line).
    None,
    /// One ordinary horizontal sync pulse, 4.7us wide.
    Normal,
    /// Narrow pulse, half the width of [`SyncKind::Normal`], broadcast at twice line rate around
    /// the vertical sync interval.
    Equalizing,
    /// Wide serrated pulse carrying the vertical sync interval itself: half a line period minus
    /// 4.7us.
    Broad,
}

/// Sync tip level, in IRE below the black/blanking reference.
const SYNC_TIP_IRE: f64 = -40.0;
/// Color burst amplitude, in IRE (peak), a standard broadcast value.
const BURST_AMPLITUDE_IRE: f64 = 20.0;

/// Raised-cosine gate half-width, in samples, for luma at the active-video boundary.
const LUMA_GATE_HALF_WIDTH: usize = 2;
/// Raised-cosine gate half-width, in samples, for chroma at the active-video boundary.
const CHROMA_GATE_HALF_WIDTH: usize = 3;

const SYNC_CLAMP_LOW: f64 = 0x0100 as f64;
const SYNC_CLAMP_HIGH: f64 = 0xFEFF as f64;

/// An 8-field `field_phase_id` progression for PAL, where the subcarrier-to-line-sync
/// relationship takes 8 fields (not 4) to repeat due to the 25 Hz subcarrier/line-rate offset.
const PAL_PHASE_SEQUENCE: [u8; 8] = [1, 2, 3, 4, 3, 4, 1, 2];

/// Synthesizes composite PAL/NTSC TBC fields from RGB frames, for use as a decoder test oracle.
#[derive(Debug, Clone)]
pub struct Encoder {
    video_parameters: ValidVideoParameters,
    next_seq_no: u32,
}

impl Encoder {
    /// Build an encoder for the given capture geometry. `video_parameters.system` selects NTSC
    /// (Y/I/Q) or PAL (Y/U/V) matrices and burst phasing.
    pub fn new(video_parameters: ValidVideoParameters) -> Encoder {
        Encoder { video_parameters, next_seq_no: 1 }
    }

    /// This encoder's video parameters.
    pub fn video_parameters(&self) -> &ValidVideoParameters {
        &self.video_parameters
    }

    /// Encode one frame of active-picture RGB into a field pair.
    ///
    /// `rgb.width` must equal `active_video_end - active_video_start` and `rgb.height()` must
    /// equal `last_active_frame_line - first_active_frame_line`; this is an invariant of the
    /// caller's frame source, not a per-call failure mode (panics on mismatch, matching
    /// `field_io`'s "a short field is a programming bug" stance on fixed-geometry contracts).
    pub fn encode_frame(&mut self, rgb: &FrameRgb) -> EncodedFrame {
        let vp = &self.video_parameters;
        let active_width = (vp.active_video_end - vp.active_video_start) as usize;
        let active_height = (vp.last_active_frame_line - vp.first_active_frame_line) as usize;
        assert_eq!(rgb.width, active_width, "FrameRgb width must match active video width");
        assert_eq!(rgb.height(), active_height, "FrameRgb height must match active frame height");

        let first_seq = self.next_seq_no;
        let second_seq = first_seq + 1;
        self.next_seq_no += 2;

        let first_phase = self.field_phase_id(first_seq);
        let second_phase = self.field_phase_id(second_seq);

        let field_height = vp.field_height as usize;
        let mut first_field = Vec::with_capacity(field_height * vp.field_width as usize);
        let mut second_field = Vec::with_capacity(field_height * vp.field_width as usize);

        for field_line in 0..field_height {
            first_field.extend(self.encode_line(rgb, 2 * field_line, first_phase));
            second_field.extend(self.encode_line(rgb, 2 * field_line + 1, second_phase));
        }

        let mut first_field_metadata = FieldMetadata::new(first_seq, true);
        first_field_metadata.field_phase_id = first_phase;
        first_field_metadata.median_burst_ire = BURST_AMPLITUDE_IRE;
        first_field_metadata.sync_conf = 100;

        let mut second_field_metadata = FieldMetadata::new(second_seq, false);
        second_field_metadata.field_phase_id = second_phase;
        second_field_metadata.median_burst_ire = BURST_AMPLITUDE_IRE;
        second_field_metadata.sync_conf = 100;

        EncodedFrame { first_field, second_field, first_field_metadata, second_field_metadata }
    }

    /// `field_phase_id` (`1..=4`) for the field at 1-based sequence number `seq_no`: `seq_no % 4`
    /// for NTSC (§4.F), an 8-field cycle for PAL.
    fn field_phase_id(&self, seq_no: u32) -> u8 {
        match self.video_parameters.system {
            System::Ntsc => {
                let m = seq_no % 4;
                if m == 0 {
                    4
                } else {
                    m as u8
                }
            }
            System::Pal => PAL_PHASE_SEQUENCE[((seq_no - 1) % 8) as usize],
        }
    }

    /// The leading and trailing (half-line-later) sync pulse shapes for frame line `frame_line`
    /// (0-based, counting across both fields of the interlaced frame, per §4.F item 6's
    /// per-line-number table).
    fn sync_pulses(&self, frame_line: usize) -> (SyncKind, SyncKind) {
        match self.video_parameters.system {
            System::Ntsc => ntsc_sync_pulses(frame_line),
            System::Pal => {
                let last_line = 2 * self.video_parameters.field_height as usize - 2;
                pal_sync_pulses(frame_line, last_line)
            }
        }
    }

    /// Width, in samples, of one sync pulse of the given shape.
    fn sync_pulse_samples(&self, kind: SyncKind) -> usize {
        let vp = &self.video_parameters;
        let samples_per_us = vp.sample_rate / 1.0e6;
        let line_period_us = (vp.field_width as f64) / samples_per_us;
        let width_us = match kind {
            SyncKind::None => return 0,
            SyncKind::Normal => 4.7,
            SyncKind::Equalizing => 4.7 / 2.0,
            SyncKind::Broad => (line_period_us / 2.0) - 4.7,
        };
        (width_us * samples_per_us).round().max(0.0) as usize
    }

    /// Encode one composite field line. `frame_line` is the 0-based frame-line index (even for
    /// the first field, odd for the second); `field_phase_id` is that field's phase identifier.
    fn encode_line(&self, rgb: &FrameRgb, frame_line: usize, field_phase_id: u8) -> Vec<u16> {
        let vp = &self.video_parameters;
        let field_width = vp.field_width as usize;
        let black = f64::from(vp.black16b_ire);
        let irescale = vp.irescale();
        let blanking_level = black;

        let mut line = vec![blanking_level; field_width];

        let is_active_frame_line = frame_line >= vp.first_active_frame_line as usize
            && frame_line < vp.last_active_frame_line as usize;
        if is_active_frame_line {
            let rgb_row_index = frame_line - vp.first_active_frame_line as usize;
            let row = rgb.row(rgb_row_index);
            self.encode_active_row(&mut line, row, field_phase_id, frame_line as i64, black, irescale);
        }

        self.add_burst(&mut line, field_phase_id, frame_line);
        self.overlay_sync(&mut line, frame_line, black, irescale);

        line.into_iter()
            .map(|v| v.clamp(SYNC_CLAMP_LOW, SYNC_CLAMP_HIGH).round() as u16)
            .collect()
    }

    fn encode_active_row(
        &self,
        line: &mut [f64],
        row: &[Rgb16],
        field_phase_id: u8,
        frame_line: i64,
        black: f64,
        irescale: f64,
    ) {
        let vp = &self.video_parameters;
        let start = vp.active_video_start as usize;
        let end = vp.active_video_end as usize;
        let positive = line_phase(field_phase_id, frame_line);
        let sign = if positive { -1.0 } else { 1.0 };

        // Low-pass I/Q (or U/V) to ~1.3 MHz before modulating onto the subcarrier, per §4.F step
        // 2; this also band-limits the raised-cosine gate discontinuity at the row edges.
        let (mut plane_a, mut plane_b) = (vec![0.0; row.len()], vec![0.0; row.len()]);
        for (i, &px) in row.iter().enumerate() {
            let (y, a, b) = self.rgb_to_components(px);
            line[start + i] = black + y * (100.0 * irescale);
            plane_a[i] = a;
            plane_b[i] = b;
        }
        let lowpass = color_lowpass_13tap();
        let mut filtered_a = vec![0.0; row.len()];
        let mut filtered_b = vec![0.0; row.len()];
        lowpass.apply(&plane_a, &mut filtered_a);
        lowpass.apply(&plane_b, &mut filtered_b);

        for (i, h) in (start..end).enumerate() {
            let a = filtered_a[i] * irescale;
            let b = filtered_b[i] * irescale;
            let chroma = sign * (b * sin4fsc(h as i64) + a * cos4fsc(h as i64));
            let chroma_gate = raised_cosine_gate(i, row.len(), CHROMA_GATE_HALF_WIDTH);
            let luma_gate = raised_cosine_gate(i, row.len(), LUMA_GATE_HALF_WIDTH);
            line[h] = black + (line[h] - black) * luma_gate + chroma * chroma_gate;
        }
    }

    /// RGB -> (Y, chroma-A, chroma-B): NTSC gives (Y, I, Q); PAL gives (Y, U, V). `chroma-A`
    /// pairs with [`cos4fsc`], `chroma-B` with [`sin4fsc`], matching `split_iq`'s assignment.
    fn rgb_to_components(&self, px: Rgb16) -> (f64, f64, f64) {
        let r = f64::from(px.r) / 65535.0;
        let g = f64::from(px.g) / 65535.0;
        let b = f64::from(px.b) / 65535.0;
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        match self.video_parameters.system {
            System::Ntsc => {
                let i = 0.595716 * r - 0.274453 * g - 0.321263 * b;
                let q = 0.211456 * r - 0.522591 * g + 0.311135 * b;
                (y, i, q)
            }
            System::Pal => {
                let u = -0.147 * r - 0.289 * g + 0.436 * b;
                let v = 0.615 * r - 0.515 * g - 0.100 * b;
                (y, u, v)
            }
        }
    }

    /// Generate the color burst: a fixed-phase tone over `colour_burst_start..colour_burst_end`,
    /// 180 degrees from the subcarrier reference for NTSC, alternating +-135 degrees (Vsw) for
    /// PAL. Suppressed on lines whose leading sync pulse isn't [`SyncKind::Normal`] (the vertical
    /// sync interval carries no burst).
    fn add_burst(&self, line: &mut [f64], field_phase_id: u8, frame_line: usize) {
        let vp = &self.video_parameters;
        let (leading, _) = self.sync_pulses(frame_line);
        if leading != SyncKind::Normal {
            return;
        }
        let amplitude = BURST_AMPLITUDE_IRE * vp.irescale();
        let (bsin, bcos) = match vp.system {
            System::Ntsc => (0.0, -1.0),
            System::Pal => {
                let vsw = if line_phase(field_phase_id, frame_line as i64) { 1.0 } else { -1.0 };
                // cos(135 deg) = -sin(135 deg) * ... ; use the standard +-135 degree swing.
                (vsw * std::f64::consts::FRAC_1_SQRT_2, -std::f64::consts::FRAC_1_SQRT_2)
            }
        };
        for h in vp.colour_burst_start as usize..vp.colour_burst_end as usize {
            line[h] += amplitude * (bsin * sin4fsc(h as i64) + bcos * cos4fsc(h as i64));
        }
    }

    /// Overwrite this line's two half-line sync pulse slots (leading, at sample 0, and trailing,
    /// at half the line period) with `SYNC_TIP_IRE` below black, per the per-line sync table.
    fn overlay_sync(&self, line: &mut [f64], frame_line: usize, black: f64, irescale: f64) {
        let (leading, trailing) = self.sync_pulses(frame_line);
        let sync_level = black + SYNC_TIP_IRE * irescale;
        let leading_samples = self.sync_pulse_samples(leading).min(line.len());
        line[..leading_samples].iter_mut().for_each(|v| *v = sync_level);

        let half_line = line.len() / 2;
        let trailing_samples = self.sync_pulse_samples(trailing).min(line.len() - half_line);
        line[half_line..half_line + trailing_samples].iter_mut().for_each(|v| *v = sync_level);
    }
}

/// Per-frame-line sync pulse shapes for a 525-line NTSC frame (`frame_line` 0-based), per
/// [Poynton p502]: equalizing pulses, then the broad vertical-sync pulses, then equalizing pulses
/// again, before ordinary horizontal sync resumes. The trailing slot runs the same pattern offset
/// by one line, plus one extra equalizing pulse on the last line before the dummy line.
fn ntsc_sync_pulses(frame_line: usize) -> (SyncKind, SyncKind) {
    let leading = if frame_line < 6 {
        SyncKind::Equalizing
    } else if frame_line < 12 {
        SyncKind::Broad
    } else if frame_line < 18 {
        SyncKind::Equalizing
    } else {
        SyncKind::Normal
    };
    let trailing = if frame_line < 5 {
        SyncKind::Equalizing
    } else if frame_line < 11 {
        SyncKind::Broad
    } else if frame_line < 17 {
        SyncKind::Equalizing
    } else if frame_line == 524 {
        SyncKind::Equalizing
    } else {
        SyncKind::None
    };
    (leading, trailing)
}

/// Per-frame-line sync pulse shapes for a 625-line PAL frame, per [Poynton p521]. Unlike NTSC,
/// the vertical-interval block also reappears near the end of the frame (`last_line` is the
/// 0-based index of the last real picture line, 624 for a subcarrier-locked 313-line field
/// height), because PAL's field structure folds the second field's pre-roll into the first
/// field's frame numbering.
fn pal_sync_pulses(frame_line: usize, last_line: usize) -> (SyncKind, SyncKind) {
    let leading = if frame_line < 5 {
        SyncKind::Broad
    } else if frame_line < 10 {
        SyncKind::Equalizing
    } else if frame_line >= last_line - 4 {
        SyncKind::Equalizing
    } else {
        SyncKind::Normal
    };
    let trailing = if frame_line < 4 {
        SyncKind::Broad
    } else if frame_line < 9 {
        SyncKind::Equalizing
    } else if frame_line >= last_line - 5 && frame_line < last_line {
        SyncKind::Equalizing
    } else if frame_line == last_line {
        SyncKind::Broad
    } else {
        SyncKind::None
    };
    (leading, trailing)
}

/// Raised-cosine taper: `1.0` in the interior, ramping to `0.0` over `half_width` samples at
/// either edge of `[0, len)`.
fn raised_cosine_gate(i: usize, len: usize, half_width: usize) -> f64 {
    if half_width == 0 || len == 0 {
        return 1.0;
    }
    let edge_distance = i.min(len - 1 - i);
    if edge_distance >= half_width {
        return 1.0;
    }
    let phase = (edge_distance as f64 + 0.5) / (half_width as f64);
    0.5 - 0.5 * (std::f64::consts::PI * (1.0 - phase)).cos()
}

/// Fixed 13-tap symmetric low-pass, ~1.3 MHz at typical 4fSC sample rates, applied to chroma
/// before modulation (§4.F step 2).
fn color_lowpass_13tap() -> Fir {
    Fir::new(vec![
        0.006, 0.013, 0.028, 0.052, 0.082, 0.110, 0.122, 0.110, 0.082, 0.052, 0.028, 0.013, 0.006,
    ])
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;
    use crate::metadata::testutil::{ntsc_video_parameters, pal_video_parameters};

    fn encoder_ntsc() -> Encoder {
        Encoder::new(ntsc_video_parameters().validated().unwrap())
    }

    fn flat_frame(vp: &ValidVideoParameters, px: Rgb16) -> (usize, Vec<Rgb16>) {
        let width = (vp.active_video_end - vp.active_video_start) as usize;
        let height = (vp.last_active_frame_line - vp.first_active_frame_line) as usize;
        (width, vec![px; width * height])
    }

    #[googletest::test]
    fn test_encode_frame_produces_correctly_sized_fields() {
        let mut encoder = encoder_ntsc();
        let vp = encoder.video_parameters().clone();
        let (width, samples) = flat_frame(&vp, Rgb16 { r: 32768, g: 32768, b: 32768 });
        let rgb = FrameRgb { width, samples: &samples };
        let encoded = encoder.encode_frame(&rgb);
        let expected_len = (vp.field_width as usize) * (vp.field_height as usize);
        expect_that!(encoded.first_field.len(), eq(expected_len));
        expect_that!(encoded.second_field.len(), eq(expected_len));
        expect_that!(encoded.first_field_metadata.is_first_field, eq(true));
        expect_that!(encoded.second_field_metadata.is_first_field, eq(false));
    }

    #[googletest::test]
    fn test_grey_frame_active_samples_near_mid_grey() {
        let mut encoder = encoder_ntsc();
        let vp = encoder.video_parameters().clone();
        let (width, samples) = flat_frame(&vp, Rgb16 { r: 32768, g: 32768, b: 32768 });
        let rgb = FrameRgb { width, samples: &samples };
        let encoded = encoder.encode_frame(&rgb);

        let frame_line = vp.first_active_frame_line as usize + 4;
        let field_line = frame_line / 2;
        let samples_line = &encoded.first_field
            [field_line * vp.field_width as usize..(field_line + 1) * vp.field_width as usize];
        let sample = samples_line[(vp.active_video_start + 40) as usize];
        let expected_mid_grey = f64::from(vp.black16b_ire)
            + 0.5 * (f64::from(vp.white16b_ire) - f64::from(vp.black16b_ire));
        expect_that!(
            (f64::from(sample) - expected_mid_grey).abs(),
            le(0.03 * (f64::from(vp.white16b_ire) - f64::from(vp.black16b_ire)))
        );
    }

    #[googletest::test]
    fn test_field_phase_id_ntsc_cycles_mod_four() {
        let encoder = encoder_ntsc();
        expect_that!(encoder.field_phase_id(1), eq(1));
        expect_that!(encoder.field_phase_id(4), eq(4));
        expect_that!(encoder.field_phase_id(5), eq(1));
    }

    #[googletest::test]
    fn test_field_phase_id_pal_cycles_mod_eight() {
        let encoder = Encoder::new(pal_video_parameters().validated().unwrap());
        expect_that!(encoder.field_phase_id(1), eq(PAL_PHASE_SEQUENCE[0]));
        expect_that!(encoder.field_phase_id(9), eq(PAL_PHASE_SEQUENCE[0]));
    }

    #[googletest::test]
    fn test_samples_are_clamped_to_legal_range() {
        let mut encoder = encoder_ntsc();
        let vp = encoder.video_parameters().clone();
        let (width, samples) = flat_frame(&vp, Rgb16 { r: 65535, g: 65535, b: 65535 });
        let rgb = FrameRgb { width, samples: &samples };
        let encoded = encoder.encode_frame(&rgb);
        expect_that!(encoded.first_field.iter().all(|&v| (0x0100..=0xFEFF).contains(&v)), eq(true));
    }

    #[googletest::test]
    fn test_raised_cosine_gate_is_one_in_interior() {
        expect_that!(raised_cosine_gate(50, 100, 3), eq(1.0));
    }

    #[googletest::test]
    fn test_raised_cosine_gate_tapers_at_edges() {
        expect_that!(raised_cosine_gate(0, 100, 3), lt(1.0));
        expect_that!(raised_cosine_gate(0, 100, 3), gt(0.0));
    }

    #[googletest::test]
    fn test_grey_frame_round_trips_through_the_2d_comb_decoder() {
        use crate::chroma::{Comb, Configuration, SourceField};

        let mut encoder = encoder_ntsc();
        let vp = encoder.video_parameters().clone();
        let (width, samples) = flat_frame(&vp, Rgb16 { r: 32768, g: 32768, b: 32768 });
        let rgb = FrameRgb { width, samples: &samples };
        let encoded = encoder.encode_frame(&rgb);

        let source_fields = [
            SourceField {
                samples: &encoded.first_field,
                field_phase_id: encoded.first_field_metadata.field_phase_id,
            },
            SourceField {
                samples: &encoded.second_field,
                field_phase_id: encoded.second_field_metadata.field_phase_id,
            },
        ];

        let configuration = Configuration {
            dimensions: 2,
            adaptive: false,
            phase_compensation: false,
            show_map: false,
            chroma_gain: 1.0,
            chroma_phase: 0.0,
            c_nr_level: 0.0,
            y_nr_level: 0.0,
        };
        let comb = Comb::new(vp.clone(), configuration).unwrap();
        let frames = comb.decode_frames(&source_fields, 0, 2);
        expect_that!(frames.len(), eq(1));

        let frame_line = (vp.first_active_frame_line + 4) as usize;
        let x = (vp.active_video_start + 40) as usize;
        let expected_y_ire = 50.0;
        let y_ire = (frames[0].y_line(frame_line)[x] - f64::from(vp.black16b_ire)) / vp.irescale();
        expect_that!((y_ire - expected_y_ire).abs(), le(1.0));

        let noise_floor_ire = 2.0;
        expect_that!((frames[0].u_line(frame_line)[x] / vp.irescale()).abs(), le(noise_floor_ire));
        expect_that!((frames[0].v_line(frame_line)[x] / vp.irescale()).abs(), le(noise_floor_ire));
    }
}
