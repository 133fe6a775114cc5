//! Adaptive 1D/2D/3D comb filtering: the core of the chroma decoder.
//!
//! [`Comb`] owns the configuration and drives [`Comb::decode_frames`] over a window of source
//! fields; [`FrameBuffer`] holds one frame's worth of intermediate state (the interleaved raw
//! samples, the three candidate chroma extractions, and the final component planes) as it is
//! rotated through the 1D/2D/3D/IQ/NR/transform pipeline.

use snafu::Snafu;

use super::{cos4fsc, sin4fsc, ComponentFrame, SourceField};
use crate::filter::Fir;
use crate::metadata::ValidVideoParameters;

/// Result type for [`Comb::new`].
pub type ChromaConfigResult<T, E = ChromaConfigError> = std::result::Result<T, E>;

/// Error type for [`Comb::new`].
#[derive(Debug, Snafu)]
pub struct ChromaConfigError(InnerChromaConfigError);

#[derive(Debug, Snafu)]
enum InnerChromaConfigError {
    #[snafu(display(
        "sample_rate / f_sc = {ratio}, which is not within 1e-6 of 4: comb filtering requires \
        exact 4fSC sampling"
    ))]
    NotFourTimesSubcarrier { ratio: f64 },

    #[snafu(display("dimensions must be 2 or 3, got {dimensions}"))]
    BadDimensions { dimensions: u8 },
}

/// Tunable parameters for one decode run. Mirrors the knobs a LaserDisc-archival chroma decoder
/// exposes on its command line.
#[derive(Debug, Clone, Copy)]
pub struct Configuration {
    /// 2 (field-adaptive) or 3 (frame-adaptive) comb dimensions.
    pub dimensions: u8,
    /// Whether 3D mode picks the best-scoring candidate (`true`) or always uses the previous
    /// frame at the same position (`false`).
    pub adaptive: bool,
    /// Use burst-phase-locked quadrature demodulation ([`FrameBuffer::split_iq_locked`]) instead
    /// of the fixed-phase variant ([`FrameBuffer::split_iq`] + [`FrameBuffer::adjust_y`]).
    pub phase_compensation: bool,
    /// In 3D mode, overwrite the U/V output with a palette keyed to the winning candidate instead
    /// of the decoded chroma, for visualizing which candidates the adaptive filter picked.
    pub show_map: bool,
    /// Scale factor applied to I/Q before the final U/V transform.
    pub chroma_gain: f64,
    /// Extra rotation, in degrees, applied on top of the fixed 33 degree I/Q-to-U/V alignment.
    pub chroma_phase: f64,
    /// Chroma noise-reduction coring level, in IRE; 0 disables [`FrameBuffer::do_cnr`].
    pub c_nr_level: f64,
    /// Luma noise-reduction coring level, in IRE; 0 disables [`FrameBuffer::do_ynr`].
    pub y_nr_level: f64,
}

impl Configuration {
    /// Frames of look-behind the decoder needs before the first output frame (1 in 3D mode, else
    /// 0).
    pub fn look_behind(&self) -> usize {
        if self.dimensions == 3 {
            1
        } else {
            0
        }
    }

    /// Frames of look-ahead the decoder needs after the last output frame (1 in 3D mode, else 0).
    pub fn look_ahead(&self) -> usize {
        if self.dimensions == 3 {
            1
        } else {
            0
        }
    }
}

/// The comb filter, configured for one capture's geometry.
#[derive(Debug, Clone)]
pub struct Comb {
    video_parameters: ValidVideoParameters,
    configuration: Configuration,
}

impl Comb {
    /// Validate `configuration` against `video_parameters` and build a decoder.
    ///
    /// Fails if the capture isn't sampled at (very close to) 4 times the color subcarrier, or if
    /// `configuration.dimensions` isn't 2 or 3 — both are fatal at configure time, since every
    /// downstream stage assumes they hold.
    pub fn new(
        video_parameters: ValidVideoParameters,
        configuration: Configuration,
    ) -> ChromaConfigResult<Comb> {
        if configuration.dimensions != 2 && configuration.dimensions != 3 {
            return BadDimensionsSnafu { dimensions: configuration.dimensions }.fail();
        }
        let ratio = video_parameters.sample_rate / video_parameters.f_sc;
        if (ratio - 4.0).abs() >= 1.0e-6 {
            return NotFourTimesSubcarrierSnafu { ratio }.fail();
        }
        Ok(Comb { video_parameters, configuration })
    }

    /// This run's configuration.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Decode `input_fields[start_index..end_index]` into component frames, two fields per frame.
    ///
    /// `input_fields` must additionally carry `configuration.look_behind()` frames (2 fields each)
    /// before `start_index` and `configuration.look_ahead()` frames after `end_index`, used as
    /// warm-up context and discarded from the output; `start_index` must be at least
    /// `2 * look_behind()`.
    pub fn decode_frames(
        &self,
        input_fields: &[SourceField],
        start_index: usize,
        end_index: usize,
    ) -> Vec<ComponentFrame> {
        assert_eq!((end_index - start_index) % 2, 0, "field range must span whole frames");
        let look_behind_fields = 2 * self.configuration.look_behind();
        assert!(
            start_index >= look_behind_fields,
            "not enough look-behind fields before start_index"
        );

        let mut previous_frame = FrameBuffer::new(&self.video_parameters);
        let mut current_frame = FrameBuffer::new(&self.video_parameters);
        let mut next_frame = FrameBuffer::new(&self.video_parameters);

        let mut output = Vec::with_capacity((end_index - start_index) / 2);
        let pre_start_index = start_index - look_behind_fields;

        // `current_frame` always holds the frame at `field_index`'s own data; prime it directly
        // here, since the loop below only ever loads *ahead* (into `next_frame`, for the frame at
        // `field_index + 2`) and relies on the end-of-iteration rotation to carry that forward.
        current_frame.load_fields(&input_fields[pre_start_index], &input_fields[pre_start_index + 1]);
        current_frame.split_1d();
        current_frame.split_2d();

        let mut field_index = pre_start_index;
        while field_index < end_index {
            if field_index + 3 < input_fields.len() {
                next_frame.load_fields(&input_fields[field_index + 2], &input_fields[field_index + 3]);
                next_frame.split_1d();
                next_frame.split_2d();
            }

            if field_index >= start_index {
                if self.configuration.dimensions == 3 {
                    current_frame.split_3d(&previous_frame, &next_frame, self.configuration.adaptive);
                }

                let frame_height = 2 * self.video_parameters.field_height as usize - 1;
                let mut component_frame =
                    ComponentFrame::new(self.video_parameters.field_width as usize, frame_height);

                let dimensions_buf = (self.configuration.dimensions - 1) as usize;
                if self.configuration.phase_compensation {
                    current_frame.split_iq_locked(&mut component_frame, dimensions_buf);
                } else {
                    current_frame.split_iq(&mut component_frame, dimensions_buf);
                    current_frame.adjust_y(&mut component_frame);
                }
                current_frame.filter_iq(&mut component_frame);
                current_frame.do_cnr(&mut component_frame, self.configuration.c_nr_level);
                current_frame.do_ynr(&mut component_frame, self.configuration.y_nr_level);
                current_frame.transform_iq(
                    &mut component_frame,
                    self.configuration.chroma_gain,
                    self.configuration.chroma_phase,
                );

                if self.configuration.dimensions == 3 && self.configuration.show_map {
                    current_frame.overlay_map(&mut component_frame, &previous_frame, &next_frame);
                }

                output.push(component_frame);
            }

            field_index += 2;
            std::mem::swap(&mut previous_frame, &mut current_frame);
            std::mem::swap(&mut current_frame, &mut next_frame);
        }
        output
    }
}

/// Indices into [`FrameBuffer::get_best_candidate`]'s 8-candidate array. Order matters: anything
/// at or after `PrevField` is a 2D/3D-spanning candidate rather than a same-frame one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
enum CandidateIndex {
    Left = 0,
    Right = 1,
    Up = 2,
    Down = 3,
    PrevField = 4,
    NextField = 5,
    PrevFrame = 6,
    NextFrame = 7,
}

const NUM_CANDIDATES: usize = 8;

/// Palette shades (as 8-bit RGB) used by `show_map`'s visualization, one per [`CandidateIndex`].
const CANDIDATE_SHADES_RGB: [(f64, f64, f64); NUM_CANDIDATES] = [
    (0xFF as f64, 0x80 as f64, 0x80 as f64), // Left: red
    (0xFF as f64, 0x80 as f64, 0x80 as f64), // Right: red
    (0xFF as f64, 0xFF as f64, 0x80 as f64), // Up: yellow
    (0xFF as f64, 0xFF as f64, 0x80 as f64), // Down: yellow
    (0x80 as f64, 0xFF as f64, 0x80 as f64), // PrevField: green
    (0x80 as f64, 0xFF as f64, 0x80 as f64), // NextField: green
    (0x80 as f64, 0x80 as f64, 0xFF as f64), // PrevFrame: blue
    (0xFF as f64, 0x80 as f64, 0xFF as f64), // NextFrame: purple
];

/// Bias applied to a candidate's penalty, increasingly favoring closer-in-time candidates:
/// same-frame (0), adjacent field (-4), adjacent frame (-6).
const LINE_BONUS: f64 = -2.0;
const FIELD_BONUS: f64 = LINE_BONUS - 2.0;
const FRAME_BONUS: f64 = FIELD_BONUS - 2.0;

/// Rotation to align a burst-phase-locked demodulation to the I/Q axes: 33 degrees, precomputed
/// since it's applied to every sample.
const ROTATE_SIN: f64 = 0.544_639_035_015_027_1;
const ROTATE_COS: f64 = 0.838_670_567_945_424;

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// The 3D-mode scoring result for one candidate position.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    sample: f64,
    penalty: f64,
}

/// One frame's working state: the interleaved raw samples and the three candidate chroma
/// extractions (1D, 2D, 3D) computed from them.
#[derive(Debug, Clone)]
pub(crate) struct FrameBuffer {
    field_width: usize,
    frame_height: usize,
    first_active_frame_line: usize,
    last_active_frame_line: usize,
    active_video_start: usize,
    active_video_end: usize,
    colour_burst_start: usize,
    colour_burst_end: usize,
    irescale: f64,
    raw: Vec<u16>,
    /// `clp[0]` = 1D, `clp[1]` = 2D, `clp[2]` = 3D (only populated in 3D mode).
    clp: [Vec<f64>; 3],
    first_field_phase_id: u8,
    second_field_phase_id: u8,
}

impl FrameBuffer {
    fn new(video_parameters: &ValidVideoParameters) -> FrameBuffer {
        let field_width = video_parameters.field_width as usize;
        let frame_height = 2 * video_parameters.field_height as usize - 1;
        let len = field_width * frame_height;
        FrameBuffer {
            field_width,
            frame_height,
            first_active_frame_line: video_parameters.first_active_frame_line as usize,
            last_active_frame_line: video_parameters.last_active_frame_line as usize,
            active_video_start: video_parameters.active_video_start as usize,
            active_video_end: video_parameters.active_video_end as usize,
            colour_burst_start: video_parameters.colour_burst_start as usize,
            colour_burst_end: video_parameters.colour_burst_end as usize,
            irescale: video_parameters.irescale(),
            raw: vec![0; len],
            clp: [vec![0.0; len], vec![0.0; len], vec![0.0; len]],
            first_field_phase_id: 1,
            second_field_phase_id: 1,
        }
    }

    fn idx(&self, line: usize, x: usize) -> usize {
        line * self.field_width + x
    }

    fn raw_line(&self, line: usize) -> &[u16] {
        let start = self.idx(line, 0);
        &self.raw[start..start + self.field_width]
    }

    fn clp_line(&self, buf: usize, line: usize) -> &[f64] {
        let start = self.idx(line, 0);
        &self.clp[buf][start..start + self.field_width]
    }

    /// `fieldPhaseID` (1..=4) of the field that contributed `line_number`, i.e. the even/odd
    /// sub-field of the interleaved frame.
    fn field_id(&self, line_number: i64) -> u8 {
        let is_first_field = line_number.rem_euclid(2) == 0;
        if is_first_field {
            self.first_field_phase_id
        } else {
            self.second_field_phase_id
        }
    }

    /// Whether the color burst is rising at the leading edge of `line_number` (1-based, matching
    /// how the split routines below index lines).
    fn line_phase(&self, line_number: i64) -> bool {
        super::line_phase(self.field_id(line_number), line_number)
    }

    /// Interlace two fields into the frame buffer and reset the per-frame chroma candidates.
    fn load_fields(&mut self, first: &SourceField, second: &SourceField) {
        let mut field_line = 0usize;
        for frame_line in (0..self.frame_height).step_by(2) {
            let start = field_line * self.field_width;
            self.raw[self.idx(frame_line, 0)..self.idx(frame_line, 0) + self.field_width]
                .copy_from_slice(&first.samples[start..start + self.field_width]);
            if frame_line + 1 < self.frame_height {
                self.raw[self.idx(frame_line + 1, 0)..self.idx(frame_line + 1, 0) + self.field_width]
                    .copy_from_slice(&second.samples[start..start + self.field_width]);
            }
            field_line += 1;
        }

        self.first_field_phase_id = first.field_phase_id;
        self.second_field_phase_id = second.field_phase_id;

        for buf in &mut self.clp {
            buf.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    /// 1D bandpass: `[-0.25, 0, 0.5, 0, -0.25]` centered on fSC.
    fn split_1d(&mut self) {
        for line in self.first_active_frame_line..self.last_active_frame_line {
            let raw_line = self.raw_line(line);
            for x in self.active_video_start..self.active_video_end {
                let tc1 = (f64::from(raw_line[x])
                    - (f64::from(raw_line[x - 2]) + f64::from(raw_line[x + 2])) / 2.0)
                    / 2.0;
                self.clp[0][self.idx(line, x)] = tc1;
            }
        }
    }

    /// Adaptive 3-line blend of the 1D chroma against its vertical neighbours.
    fn split_2d(&mut self) {
        let k_range = 45.0 * self.irescale;
        for line in self.first_active_frame_line..self.last_active_frame_line {
            let has_previous = line >= self.first_active_frame_line + 2;
            let has_next = line + 2 < self.last_active_frame_line;

            for x in self.active_video_start..self.active_video_end {
                let current = self.clp_line(0, line)[x];
                let current_left = self.clp_line(0, line)[x - 1];
                let previous = if has_previous { self.clp_line(0, line - 2)[x] } else { 0.0 };
                let previous_left = if has_previous { self.clp_line(0, line - 2)[x - 1] } else { 0.0 };
                let next = if has_next { self.clp_line(0, line + 2)[x] } else { 0.0 };
                let next_left = if has_next { self.clp_line(0, line + 2)[x - 1] } else { 0.0 };

                let mut kp = (current.abs() - previous.abs()).abs()
                    + (current_left.abs() - previous_left.abs()).abs()
                    - (current.abs() + previous_left.abs()) * 0.10;
                let mut kn = (current.abs() - next.abs()).abs()
                    + (current_left.abs() - next_left.abs()).abs()
                    - (current.abs() + next_left.abs()) * 0.10;

                kp = clamp01(1.0 - kp / k_range);
                kn = clamp01(1.0 - kn / k_range);

                let mut sc = 1.0;
                if kn > 0.0 || kp > 0.0 {
                    if kn > 3.0 * kp {
                        kp = 0.0;
                    } else if kp > 3.0 * kn {
                        kn = 0.0;
                    }
                    sc = 2.0 / (kn + kp);
                    if sc < 1.0 {
                        sc = 1.0;
                    }
                } else if (previous.abs() - next.abs()).abs() - (next + previous).abs() * 0.2 <= 0.0
                {
                    kn = 1.0;
                    kp = 1.0;
                }

                let mut tc1 = (current - previous) * kp * sc;
                tc1 += (current - next) * kn * sc;
                tc1 /= 4.0;

                self.clp[1][self.idx(line, x)] = tc1;
            }
        }
    }

    /// Adaptive 3D comb: pick the best of 8 candidates per pixel.
    fn split_3d(&mut self, previous_frame: &FrameBuffer, next_frame: &FrameBuffer, adaptive: bool) {
        for line in self.first_active_frame_line..self.last_active_frame_line {
            for x in self.active_video_start..self.active_video_end {
                let (best_index, best_sample) =
                    self.get_best_candidate(line, x, previous_frame, next_frame, adaptive);

                let value = if (best_index as usize) < (CandidateIndex::PrevField as usize) {
                    self.clp_line(1, line)[x]
                } else {
                    (self.clp_line(0, line)[x] - best_sample) / 2.0
                };
                self.clp[2][self.idx(line, x)] = value;
            }
        }
    }

    fn get_best_candidate(
        &self,
        line_number: usize,
        h: usize,
        previous_frame: &FrameBuffer,
        next_frame: &FrameBuffer,
        adaptive: bool,
    ) -> (CandidateIndex, f64) {
        let line = line_number as i64;
        let mut candidates = [Candidate { sample: 0.0, penalty: 1000.0 }; NUM_CANDIDATES];

        candidates[CandidateIndex::Left as usize] =
            self.get_candidate(line_number, h, self, line_number, h.wrapping_sub(2), 0.0);
        candidates[CandidateIndex::Right as usize] =
            self.get_candidate(line_number, h, self, line_number, h + 2, 0.0);
        candidates[CandidateIndex::Up as usize] = self.get_candidate(
            line_number,
            h,
            self,
            (line - 2).max(0) as usize,
            h,
            LINE_BONUS,
        );
        candidates[CandidateIndex::Down as usize] =
            self.get_candidate(line_number, h, self, line_number + 2, h, LINE_BONUS);

        if self.line_phase(line) == self.line_phase(line - 1) {
            candidates[CandidateIndex::PrevField as usize] = self.get_candidate(
                line_number,
                h,
                previous_frame,
                (line - 1).max(0) as usize,
                h,
                FIELD_BONUS,
            );
            candidates[CandidateIndex::NextField as usize] =
                self.get_candidate(line_number, h, self, line_number + 1, h, FIELD_BONUS);
        } else {
            candidates[CandidateIndex::PrevField as usize] = self.get_candidate(
                line_number,
                h,
                self,
                (line - 1).max(0) as usize,
                h,
                FIELD_BONUS,
            );
            candidates[CandidateIndex::NextField as usize] =
                self.get_candidate(line_number, h, next_frame, line_number + 1, h, FIELD_BONUS);
        }

        candidates[CandidateIndex::PrevFrame as usize] =
            self.get_candidate(line_number, h, previous_frame, line_number, h, FRAME_BONUS);
        candidates[CandidateIndex::NextFrame as usize] =
            self.get_candidate(line_number, h, next_frame, line_number, h, FRAME_BONUS);

        let best_index = if adaptive {
            let mut best = 0usize;
            for i in 1..NUM_CANDIDATES {
                if candidates[i].penalty < candidates[best].penalty {
                    best = i;
                }
            }
            best
        } else {
            CandidateIndex::PrevFrame as usize
        };

        let index = match best_index {
            0 => CandidateIndex::Left,
            1 => CandidateIndex::Right,
            2 => CandidateIndex::Up,
            3 => CandidateIndex::Down,
            4 => CandidateIndex::PrevField,
            5 => CandidateIndex::NextField,
            6 => CandidateIndex::PrevFrame,
            _ => CandidateIndex::NextFrame,
        };
        (index, candidates[best_index].sample)
    }

    /// Score one candidate position in `frame_buffer` against the reference position
    /// `(ref_line_number, ref_h)` in `self`.
    fn get_candidate(
        &self,
        ref_line_number: usize,
        ref_h: usize,
        frame_buffer: &FrameBuffer,
        line_number: usize,
        h: usize,
        adjust_penalty: f64,
    ) -> Candidate {
        let sample = frame_buffer.clp_line(0, line_number)[h];

        if line_number < self.first_active_frame_line || line_number >= self.last_active_frame_line
        {
            return Candidate { sample, penalty: 1000.0 };
        }

        let want_phase = (2 + if self.line_phase(ref_line_number as i64) { 2 } else { 0 }
            + ref_h as i64)
            .rem_euclid(4);
        let have_phase = (if frame_buffer.line_phase(line_number as i64) { 2 } else { 0 }
            + h as i64)
            .rem_euclid(4);
        if want_phase != have_phase {
            return Candidate { sample, penalty: 1000.0 };
        }

        let ref_line = self.raw_line(ref_line_number);
        let candidate_line = frame_buffer.raw_line(line_number);

        let mut y_penalty = 0.0;
        for offset in -1i64..=1 {
            let ref_x = (ref_h as i64 + offset) as usize;
            let cand_x = (h as i64 + offset) as usize;
            let ref_c = self.clp_line(1, ref_line_number)[ref_x];
            let ref_y = f64::from(ref_line[ref_x]) - ref_c;
            let candidate_c = frame_buffer.clp_line(1, line_number)[cand_x];
            let candidate_y = f64::from(candidate_line[cand_x]) - candidate_c;
            y_penalty += (ref_y - candidate_y).abs();
        }
        y_penalty = y_penalty / 3.0 / self.irescale;

        let weights = [0.5, 1.0, 0.5];
        let mut iq_penalty = 0.0;
        for (i, offset) in (-1i64..=1).enumerate() {
            let ref_x = (ref_h as i64 + offset) as usize;
            let cand_x = (h as i64 + offset) as usize;
            let ref_c = self.clp_line(1, ref_line_number)[ref_x];
            let candidate_c = -frame_buffer.clp_line(1, line_number)[cand_x];
            iq_penalty += (ref_c - candidate_c).abs() * weights[i];
        }
        iq_penalty = (iq_penalty / 2.0 / self.irescale) * 0.28;

        Candidate { sample, penalty: y_penalty + iq_penalty + adjust_penalty }
    }

    /// Demodulate chroma by rotating against the measured burst phase. `dimensions_buf` selects
    /// which `clp` candidate to read (1 = 2D, 2 = 3D), matching the run's configured dimensions.
    fn split_iq_locked(&self, component_frame: &mut ComponentFrame, dimensions_buf: usize) {
        for line in self.first_active_frame_line..self.last_active_frame_line {
            let raw_line = self.raw_line(line);
            let (bsin, bcos) = self.detect_burst(raw_line);

            for h in self.active_video_start..self.active_video_end {
                let val = self.clp_line(dimensions_buf, line)[h];

                let lsin = val * sin4fsc(h as i64) * 2.0;
                let lcos = val * cos4fsc(h as i64) * 2.0;
                let ti = lsin * bcos - lcos * bsin;
                let tq = lsin * bsin + lcos * bcos;

                let i = ti * ROTATE_COS - tq * -ROTATE_SIN;
                let q = -(ti * -ROTATE_SIN + tq * ROTATE_COS);

                if h + 1 < self.field_width {
                    component_frame.u_line_mut(line)[h + 1] = i;
                    component_frame.v_line_mut(line)[h + 1] = q;
                }
                component_frame.y_line_mut(line)[h] = f64::from(raw_line[h]) - val;
            }
        }
    }

    /// Burst phase by product detection against the 4fSC sin/cos table, normalized.
    fn detect_burst(&self, line: &[u16]) -> (f64, f64) {
        let mut bsin = 0.0;
        let mut bcos = 0.0;
        for i in self.colour_burst_start..self.colour_burst_end {
            bsin += f64::from(line[i]) * sin4fsc(i as i64);
            bcos += f64::from(line[i]) * cos4fsc(i as i64);
        }
        let length = (self.colour_burst_end - self.colour_burst_start) as f64;
        bsin /= length;
        bcos /= length;

        let burst_norm = (bsin * bsin + bcos * bcos).sqrt().max(130_000.0 / 128.0);
        (bsin / burst_norm, bcos / burst_norm)
    }

    /// Demodulate chroma by fixed line-phase parity, leaving burst-phase error uncorrected; must
    /// be paired with [`FrameBuffer::adjust_y`]. `dimensions_buf` selects which `clp` candidate to
    /// read (1 = 2D, 2 = 3D).
    fn split_iq(&self, component_frame: &mut ComponentFrame, dimensions_buf: usize) {
        for line in self.first_active_frame_line..self.last_active_frame_line {
            let raw_line = self.raw_line(line);
            let line_phase = self.line_phase(line as i64);

            let mut si = 0.0;
            let mut sq = 0.0;
            for h in self.active_video_start..self.active_video_end {
                let mut cavg = self.clp_line(dimensions_buf, line)[h];
                if line_phase {
                    cavg = -cavg;
                }
                match h % 4 {
                    0 => sq = cavg,
                    1 => si = -cavg,
                    2 => sq = -cavg,
                    _ => si = cavg,
                }
                component_frame.y_line_mut(line)[h] = f64::from(raw_line[h]);
                component_frame.u_line_mut(line)[h] = si;
                component_frame.v_line_mut(line)[h] = sq;
            }
        }
    }

    /// Subtract the chroma contribution (by fixed line-phase parity) from baseband Y.
    fn adjust_y(&self, component_frame: &mut ComponentFrame) {
        for line in self.first_active_frame_line..self.last_active_frame_line {
            let line_phase = self.line_phase(line as i64);
            for h in self.active_video_start..self.active_video_end {
                let i = component_frame.u_line(line)[h];
                let q = component_frame.v_line(line)[h];
                let mut comp = match h % 4 {
                    0 => -q,
                    1 => i,
                    2 => q,
                    _ => -i,
                };
                if !line_phase {
                    comp = -comp;
                }
                component_frame.y_line_mut(line)[h] -= comp;
            }
        }
    }

    /// Fixed low-pass FIR (~600 kHz at this sample rate) applied to I and Q.
    fn filter_iq(&self, component_frame: &mut ComponentFrame) {
        let iq_filter = color_lowpass_fir();
        let width = self.active_video_end - self.active_video_start;
        let mut scratch = vec![0.0; width];

        for line in self.first_active_frame_line..self.last_active_frame_line {
            let i = &mut component_frame.u_line_mut(line)
                [self.active_video_start..self.active_video_end];
            iq_filter.apply(i, &mut scratch);
            i.copy_from_slice(&scratch);

            let q = &mut component_frame.v_line_mut(line)
                [self.active_video_start..self.active_video_end];
            iq_filter.apply(q, &mut scratch);
            q.copy_from_slice(&scratch);
        }
    }

    /// Coring noise reduction on I/Q: a symmetric FIR high-pass followed by clipping the result to
    /// `c_nr_level * irescale`, then subtracting it back out.
    fn do_cnr(&self, component_frame: &mut ComponentFrame, c_nr_level: f64) {
        if c_nr_level == 0.0 {
            return;
        }
        let nr_c = c_nr_level * self.irescale;
        let mut i_filter = chroma_nr_highpass_fir();
        let mut q_filter = chroma_nr_highpass_fir();
        let delay = i_filter.num_taps() / 2;

        for line in self.first_active_frame_line..self.last_active_frame_line {
            let hp_i = feed_with_padding(
                &mut i_filter,
                &component_frame.u_line(line)[self.active_video_start..self.active_video_end],
                delay,
            );
            let hp_q = feed_with_padding(
                &mut q_filter,
                &component_frame.v_line(line)[self.active_video_start..self.active_video_end],
                delay,
            );

            let i = component_frame.u_line_mut(line);
            for (offset, &ai) in hp_i.iter().enumerate() {
                let x = self.active_video_start + offset;
                i[x] -= ai.clamp(-nr_c, nr_c);
            }
            let q = component_frame.v_line_mut(line);
            for (offset, &aq) in hp_q.iter().enumerate() {
                let x = self.active_video_start + offset;
                q[x] -= aq.clamp(-nr_c, nr_c);
            }
        }
    }

    /// Coring noise reduction on Y, mirroring [`FrameBuffer::do_cnr`].
    fn do_ynr(&self, component_frame: &mut ComponentFrame, y_nr_level: f64) {
        if y_nr_level == 0.0 {
            return;
        }
        let nr_y = y_nr_level * self.irescale;
        let mut y_filter = luma_nr_highpass_fir();
        let delay = y_filter.num_taps() / 2;

        for line in self.first_active_frame_line..self.last_active_frame_line {
            let hp_y = feed_with_padding(
                &mut y_filter,
                &component_frame.y_line(line)[self.active_video_start..self.active_video_end],
                delay,
            );
            let y = component_frame.y_line_mut(line);
            for (offset, &a) in hp_y.iter().enumerate() {
                let x = self.active_video_start + offset;
                y[x] -= a.clamp(-nr_y, nr_y);
            }
        }
    }

    /// Rotate (I, Q) into (U, V) by `33 + chroma_phase` degrees and apply `chroma_gain`.
    fn transform_iq(&self, component_frame: &mut ComponentFrame, chroma_gain: f64, chroma_phase: f64) {
        let theta = (33.0 + chroma_phase) * std::f64::consts::PI / 180.0;
        let bp = theta.sin() * chroma_gain;
        let bq = theta.cos() * chroma_gain;

        for line in self.first_active_frame_line..self.last_active_frame_line {
            for h in self.active_video_start..self.active_video_end {
                let i = component_frame.u_line(line)[h];
                let q = component_frame.v_line(line)[h];
                component_frame.u_line_mut(line)[h] = -bp * i + bq * q;
                component_frame.v_line_mut(line)[h] = bq * i + bp * q;
            }
        }
    }

    /// Overwrite U/V with a palette keyed to the winning 3D candidate, leaving Y untouched.
    fn overlay_map(
        &self,
        component_frame: &mut ComponentFrame,
        previous_frame: &FrameBuffer,
        next_frame: &FrameBuffer,
    ) {
        for line in self.first_active_frame_line..self.last_active_frame_line {
            for h in self.active_video_start..self.active_video_end {
                let (index, _) = self.get_best_candidate(line, h, previous_frame, next_frame, true);
                let (r, g, b) = CANDIDATE_SHADES_RGB[index as usize];
                let (u, v) = rgb_to_uv(r, g, b);
                component_frame.u_line_mut(line)[h] = u;
                component_frame.v_line_mut(line)[h] = v;
            }
        }
    }
}

/// BT.601 RGB-to-UV, used only by `overlay_map`'s fixed debug palette (the canvas that performed
/// this conversion in the original implementation wasn't part of this crate's retrieval pack).
fn rgb_to_uv(r: f64, g: f64, b: f64) -> (f64, f64) {
    let u = -0.147 * r - 0.289 * g + 0.436 * b;
    let v = 0.615 * r - 0.515 * g - 0.100 * b;
    (u, v)
}

fn feed_with_padding(filter: &mut Fir, line: &[f64], delay: usize) -> Vec<f64> {
    filter.clear();
    for _ in 0..delay {
        filter.feed(0.0);
    }
    let mut padded = Vec::with_capacity(line.len() + delay);
    for &x in line {
        padded.push(filter.feed(x));
    }
    for _ in 0..delay {
        padded.push(filter.feed(0.0));
    }
    padded[delay..delay + line.len()].to_vec()
}

/// ~600 kHz low-pass, applied to I/Q before the final U/V transform.
fn color_lowpass_fir() -> Fir {
    Fir::new(vec![0.05, 0.1, 0.17, 0.26, 0.17, 0.1, 0.05])
}

/// High-pass coring filter for chroma noise reduction: spectral inversion of a gentle low-pass.
fn chroma_nr_highpass_fir() -> Fir {
    highpass_from_lowpass(&[0.05, 0.1, 0.17, 0.26, 0.17, 0.1, 0.05])
}

/// High-pass coring filter for luma noise reduction: a slightly tighter low-pass than the chroma
/// one, since luma carries more fine detail worth preserving.
fn luma_nr_highpass_fir() -> Fir {
    highpass_from_lowpass(&[0.02, 0.08, 0.15, 0.22, 0.23, 0.22, 0.15, 0.08, 0.02][..7].to_vec().as_slice())
}

fn highpass_from_lowpass(lowpass: &[f64]) -> Fir {
    let mut coeffs = lowpass.to_vec();
    let center = coeffs.len() / 2;
    for c in &mut coeffs {
        *c = -*c;
    }
    coeffs[center] += 1.0;
    Fir::new(coeffs)
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;
    use crate::metadata::testutil::ntsc_video_parameters;

    fn test_video_parameters() -> ValidVideoParameters {
        ntsc_video_parameters().validated().expect("fixture must validate")
    }

    #[googletest::test]
    fn test_comb_new_rejects_non_4fsc_sampling() {
        let mut params = *test_video_parameters();
        params.sample_rate *= 1.5;
        let params = params.validated().expect("still valid, just not 4fsc");
        let config = Configuration {
            dimensions: 2,
            adaptive: true,
            phase_compensation: false,
            show_map: false,
            chroma_gain: 1.0,
            chroma_phase: 0.0,
            c_nr_level: 0.0,
            y_nr_level: 0.0,
        };
        expect_that!(Comb::new(params, config), err(anything()));
    }

    #[googletest::test]
    fn test_comb_new_rejects_bad_dimensions() {
        let params = test_video_parameters();
        let config = Configuration {
            dimensions: 4,
            adaptive: true,
            phase_compensation: false,
            show_map: false,
            chroma_gain: 1.0,
            chroma_phase: 0.0,
            c_nr_level: 0.0,
            y_nr_level: 0.0,
        };
        expect_that!(Comb::new(params, config), err(anything()));
    }

    #[googletest::test]
    fn test_configuration_look_behind_ahead_zero_in_2d_mode() {
        let config = Configuration {
            dimensions: 2,
            adaptive: true,
            phase_compensation: false,
            show_map: false,
            chroma_gain: 1.0,
            chroma_phase: 0.0,
            c_nr_level: 0.0,
            y_nr_level: 0.0,
        };
        expect_that!(config.look_behind(), eq(0));
        expect_that!(config.look_ahead(), eq(0));
    }

    #[googletest::test]
    fn test_configuration_look_behind_ahead_one_in_3d_mode() {
        let config = Configuration {
            dimensions: 3,
            adaptive: true,
            phase_compensation: false,
            show_map: false,
            chroma_gain: 1.0,
            chroma_phase: 0.0,
            c_nr_level: 0.0,
            y_nr_level: 0.0,
        };
        expect_that!(config.look_behind(), eq(1));
        expect_that!(config.look_ahead(), eq(1));
    }

    #[googletest::test]
    fn test_line_phase_rule_matches_fixed_table() {
        let params = test_video_parameters();
        let mut frame = FrameBuffer::new(&params);
        frame.first_field_phase_id = 1;
        frame.second_field_phase_id = 2;
        // field_line = line / 2; even field_line -> isPositiveOnEvenLines for ID 1 == true.
        expect_that!(frame.line_phase(0), eq(true));
        expect_that!(frame.line_phase(2), eq(true));
        expect_that!(frame.line_phase(4), eq(true));
    }

    #[googletest::test]
    fn test_split_1d_zero_on_flat_signal() {
        let params = test_video_parameters();
        let mut frame = FrameBuffer::new(&params);
        frame.raw.iter_mut().for_each(|v| *v = 20000);
        frame.split_1d();
        let line = frame.first_active_frame_line;
        let x = frame.active_video_start + 4;
        expect_that!(frame.clp_line(0, line)[x], eq(0.0));
    }

    #[googletest::test]
    fn test_decode_frames_outputs_one_frame_per_pair_in_2d_mode() {
        let params = test_video_parameters();
        let config = Configuration {
            dimensions: 2,
            adaptive: true,
            phase_compensation: false,
            show_map: false,
            chroma_gain: 1.0,
            chroma_phase: 0.0,
            c_nr_level: 0.0,
            y_nr_level: 0.0,
        };
        let comb = Comb::new(params, config).expect("valid configuration");

        let field_len = params.field_width as usize * params.field_height as usize;
        let samples = vec![20000u16; field_len];
        let fields: Vec<SourceField> = (0..4)
            .map(|i| SourceField { samples: &samples, field_phase_id: (i % 4) + 1 })
            .collect();

        let frames = comb.decode_frames(&fields, 0, 4);
        expect_that!(frames.len(), eq(2));
    }
}
