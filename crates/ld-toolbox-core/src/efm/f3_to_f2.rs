//! F3→F2 frame conversion: section assembly from the Q-channel subcode, disc-time tracking with
//! sync-loss recovery, and the three CIRC stages wired together into one pipeline stage.
//!
//! Grounded on `F3ToF2Frames` (drives the stages, tracks disc time, recovers from gaps) together
//! with the Q-channel layout defined by IEC 60908 ("Red Book") clause 22: a 96-bit Q-channel
//! field per 98-frame section, carrying a 4-bit CONTROL nibble, 4-bit MODE (ADR) nibble, 72 bits
//! of BCD time/track data for modes 1 and 4, and a CRC-16 (stored bitwise-inverted on disc).

use crate::efm::circ::{C1Circ, C2Circ, C2Deinterleave, CircStatistics};
use crate::util::{bcd_byte_to_u8, crc16_ccitt};

/// Number of F3 frames per subcode section (one Q-channel field).
pub const FRAMES_PER_SECTION: usize = 98;

/// CD/LaserDisc subcode frame rate: 75 sections (and so 75 F2 frames) per second.
pub const FRAMES_PER_SECOND: i64 = 75;

/// A point in disc/track time, stored as a signed frame count at 75 frames/second.
///
/// Signed so that [`TrackTime::add_frames`] can step backward (used once, to seed `lastDiscTime`
/// one frame before the first section) without the caller having to special-case zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackTime {
    total_frames: i64,
}

impl TrackTime {
    /// Construct from already-decimal minute/second/frame components.
    pub fn new(minute: u8, second: u8, frame: u8) -> TrackTime {
        let total = (i64::from(minute) * 60 + i64::from(second)) * FRAMES_PER_SECOND + i64::from(frame);
        TrackTime { total_frames: total }
    }

    /// Construct from BCD-encoded minute/second/frame bytes, as stored in the Q-channel.
    fn from_bcd(minute: u8, second: u8, frame: u8) -> Option<TrackTime> {
        Some(TrackTime::new(
            bcd_byte_to_u8(minute).ok()?,
            bcd_byte_to_u8(second).ok()?,
            bcd_byte_to_u8(frame).ok()?,
        ))
    }

    /// Zero-based total frame count since `00:00:00`. May be negative transiently (see
    /// [`TrackTime::default`]'s use as a one-frame-before-the-start sentinel).
    pub fn total_frames(&self) -> i64 {
        self.total_frames
    }

    /// Minute component (`total_frames / (60 * 75)`).
    pub fn minutes(&self) -> i64 {
        self.total_frames.div_euclid(60 * FRAMES_PER_SECOND)
    }

    /// Second-within-minute component.
    pub fn seconds(&self) -> i64 {
        self.total_frames.div_euclid(FRAMES_PER_SECOND).rem_euclid(60)
    }

    /// Frame-within-second component.
    pub fn frame(&self) -> i64 {
        self.total_frames.rem_euclid(FRAMES_PER_SECOND)
    }

    /// Advance (or, with a negative count, retreat) by `frames`.
    pub fn add_frames(&mut self, frames: i64) {
        self.total_frames += frames;
    }

    /// `self - other`, in frames.
    pub fn difference(&self, other: TrackTime) -> i64 {
        self.total_frames - other.total_frames
    }
}

impl std::fmt::Display for TrackTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.minutes(), self.seconds(), self.frame())
    }
}

/// The CONTROL nibble of a Q-channel field (IEC 60908 clause 22.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackControl {
    /// `true` if the track was mastered without pre-emphasis.
    pub is_no_preemp_not_preemp: bool,
    /// `true` if digital copying is permitted.
    pub copy_permitted: bool,
    /// `true` for a data track, `false` for an audio track.
    pub is_data_track: bool,
    /// `true` for four-channel audio, `false` for two-channel.
    pub is_four_channel: bool,
}

impl TrackControl {
    fn from_nibble(nibble: u8) -> TrackControl {
        TrackControl {
            is_no_preemp_not_preemp: nibble & 0b0001 == 0,
            copy_permitted: nibble & 0b0010 != 0,
            is_data_track: nibble & 0b0100 != 0,
            is_four_channel: nibble & 0b1000 != 0,
        }
    }
}

/// One subcode section's Q-channel data (one per 98 F3 frames), decoded after CRC-16
/// verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Section {
    /// `true` if the Q-channel's CRC-16 checked out. Every other field is meaningless when this
    /// is `false`.
    pub crc_valid: bool,
    /// The 4-bit MODE (ADR) nibble. Only modes 1 and 4 (disc/track time) are interpreted further.
    pub q_mode: u8,
    /// CONTROL nibble, decoded regardless of `q_mode`.
    pub control: TrackControl,
    /// `true` if this section falls in the lead-in area (mode 1/4 only, track number `0`).
    pub is_lead_in: bool,
    /// `true` if this section falls in the lead-out area (mode 1/4 only, track number `0xAA`).
    pub is_lead_out: bool,
    /// Track number in `1..=99`, or `0`/`0xAA` for lead-in/lead-out (mode 1/4 only).
    pub track_number: u8,
    /// Index within the track (mode 1/4 only).
    pub index: u8,
    /// Track-relative time (mode 1/4 only).
    pub track_time: TrackTime,
    /// Absolute disc time (mode 1/4 only).
    pub disc_time: TrackTime,
}

impl Section {
    /// `true` if [`Section::q_mode`] is one of the time-carrying modes this decoder understands.
    fn has_time_code(&self) -> bool {
        self.crc_valid && (self.q_mode == 1 || self.q_mode == 4)
    }

    /// Assemble a section from 98 F3 frames' subcode symbols.
    ///
    /// Each symbol carries one bit per subcode channel (P high bit .. W low bit); the first two
    /// symbols are the SYNC0/SYNC1 patterns and carry no channel data. This extracts the Q
    /// channel's bit from each of the remaining 96 symbols into 12 bytes, verifies the CRC-16
    /// (stored bitwise-inverted on disc, per IEC 60908 clause 22.3), and decodes the Q-channel
    /// payload if it checks out.
    pub fn from_subcode_symbols(symbols: &[u8; FRAMES_PER_SECTION]) -> Section {
        const Q_CHANNEL_BIT: u8 = 0x40;
        let mut q = [0u8; 12];
        for (i, &symbol) in symbols[2..].iter().enumerate() {
            let bit = u8::from(symbol & Q_CHANNEL_BIT != 0);
            q[i / 8] |= bit << (7 - (i % 8));
        }

        let stored_crc = u16::from_be_bytes([q[10], q[11]]);
        let computed_crc = crc16_ccitt(&q[0..10]);
        let crc_valid = computed_crc == !stored_crc;
        if !crc_valid {
            return Section { crc_valid: false, ..Section::default() };
        }

        let control = TrackControl::from_nibble(q[0] >> 4);
        let q_mode = q[0] & 0x0F;
        let mut section = Section { crc_valid: true, q_mode, control, ..Section::default() };

        if q_mode == 1 || q_mode == 4 {
            section.is_lead_in = q[1] == 0x00;
            section.is_lead_out = q[1] == 0xAA;
            section.track_number = bcd_byte_to_u8(q[1]).unwrap_or(q[1]);
            section.index = bcd_byte_to_u8(q[2]).unwrap_or(q[2]);
            section.track_time = TrackTime::from_bcd(q[3], q[4], q[5]).unwrap_or_default();
            section.disc_time = TrackTime::from_bcd(q[7], q[8], q[9]).unwrap_or_default();
        }

        section
    }
}

/// One F3 frame: the CIRC-protected unit recovered from the EFM bitstream.
#[derive(Debug, Clone, Copy)]
pub struct F3Frame {
    /// 32 data symbols (24 audio/data + 4 Q-parity mirror + 4 C1 parity).
    pub data: [u8; 32],
    /// Per-symbol flag: `true` if the EFM/channel decoder flagged this symbol unreliable.
    pub errors: [bool; 32],
    /// One subcode byte, one bit per P..W channel.
    pub subcode_symbol: u8,
}

/// One F2 frame: 24 bytes of CIRC-corrected payload plus the subcode metadata covering the
/// section it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct F2Frame {
    /// 24 payload symbols (16 audio samples' worth, or equivalent data-track payload).
    pub data: [u8; 24],
    /// Per-symbol erasure flag.
    pub errors: [bool; 24],
    /// Absolute disc time, always populated (from the corrected local estimate if the section's
    /// own Q data didn't validate).
    pub disc_time: TrackTime,
    /// Track-relative time. Defaults to `00:00:00` when the owning section had no valid Q data.
    pub track_time: TrackTime,
    /// Track number. Defaults to `1` when the owning section had no valid Q data.
    pub track_number: u8,
    /// `true` unless the owning section's Q data was invalid (conservatively assumed running).
    pub is_encoder_running: bool,
}

/// Aggregate statistics for a [`F3ToF2Converter`] run.
#[derive(Debug, Clone, Copy, Default)]
pub struct F3ToF2Statistics {
    pub total_f3_frames: u64,
    pub total_f2_frames: u64,
    pub c1: CircStatistics,
    pub c2: CircStatistics,
    pub c2_deinterleave: CircStatistics,
    pub initial_disc_time: TrackTime,
    pub current_disc_time: TrackTime,
    pub sequence_interruptions: u64,
    pub missing_f3_frames: u64,
    pub preemp_frames: u64,
}

/// A C1 block in flight, paired with the section it belongs to so disc-time/track metadata can
/// be attached once it reaches an F2 frame.
struct PendingC1 {
    data: [u8; 28],
    errors: [bool; 28],
}

/// Drives the C1 → C2 → deinterleave pipeline across a stream of 98-F3-frame sections, tracking
/// disc time from the Q-channel and recovering from gaps by flushing the CIRC delay buffers.
#[derive(Debug)]
pub struct F3ToF2Converter {
    no_time_stamp: bool,
    c1: C1Circ,
    c2: C2Circ,
    c2_deinterleave: C2Deinterleave,
    f2_buffer: Vec<F2Frame>,
    section_buffer: Vec<Section>,
    section_disc_times: Vec<TrackTime>,
    initial_disc_time_set: bool,
    last_disc_time: TrackTime,
    lost_sections: bool,
    statistics: F3ToF2Statistics,
}

/// Implausible disc side length: more than 100 minutes from the initial time invalidates a
/// section's Q data instead of being trusted.
const MAX_PLAUSIBLE_FRAMES: i64 = 100 * 60 * FRAMES_PER_SECOND;

impl F3ToF2Converter {
    /// Construct a converter. When `no_time_stamp` is set, disc times are synthesized as
    /// strictly contiguous starting from `00:00:00` instead of being read from the Q-channel —
    /// for sources whose subcode never validates.
    pub fn new(no_time_stamp: bool) -> F3ToF2Converter {
        F3ToF2Converter {
            no_time_stamp,
            c1: C1Circ::new(),
            c2: C2Circ::new(),
            c2_deinterleave: C2Deinterleave::new(),
            f2_buffer: Vec::new(),
            section_buffer: Vec::new(),
            section_disc_times: Vec::new(),
            initial_disc_time_set: false,
            last_disc_time: TrackTime::default(),
            lost_sections: false,
            statistics: F3ToF2Statistics::default(),
        }
    }

    /// Reset the converter to its initial, empty state.
    pub fn reset(&mut self) {
        *self = F3ToF2Converter::new(self.no_time_stamp);
    }

    /// Accumulated statistics since construction (or the last [`F3ToF2Converter::reset`]).
    pub fn statistics(&self) -> F3ToF2Statistics {
        let mut stats = self.statistics;
        stats.c1 = self.c1.statistics();
        stats.c2 = self.c2.statistics();
        stats.c2_deinterleave = self.c2_deinterleave.statistics();
        stats
    }

    /// Process a run of F3 frames, which must be a whole number of 98-frame sections aligned on
    /// the section boundary. Returns the F2 frames produced (a multiple of 98, since F2 frames
    /// are only released a full section at a time).
    ///
    /// Violating the section-alignment invariant is a programming bug in the caller (the
    /// upstream EFM demodulator is responsible for section sync), not a recoverable condition.
    pub fn process(&mut self, f3_frames: &[F3Frame]) -> Vec<F2Frame> {
        assert!(
            f3_frames.len() % FRAMES_PER_SECTION == 0,
            "F3ToF2Converter::process: upstream provided {} F3 frames, not a multiple of {}",
            f3_frames.len(),
            FRAMES_PER_SECTION
        );

        let mut f2_out = Vec::new();
        for section_frames in f3_frames.chunks_exact(FRAMES_PER_SECTION) {
            self.statistics.total_f3_frames += FRAMES_PER_SECTION as u64;
            self.process_section(section_frames, &mut f2_out);
        }
        f2_out
    }

    fn process_section(&mut self, section_frames: &[F3Frame], f2_out: &mut Vec<F2Frame>) {
        let mut symbols = [0u8; FRAMES_PER_SECTION];
        for (i, frame) in section_frames.iter().enumerate() {
            symbols[i] = frame.subcode_symbol;
        }
        let mut section = Section::from_subcode_symbols(&symbols);

        if section.has_time_code() {
            let frames_since_initial = section.disc_time.difference(self.statistics.initial_disc_time);
            if frames_since_initial > MAX_PLAUSIBLE_FRAMES {
                log::debug!(
                    "implausible section time stamp {} given initial time {} - ignoring section Q data",
                    section.disc_time,
                    self.statistics.initial_disc_time
                );
                section = Section::default();
            }
        }

        if section.has_time_code() && !section.control.is_no_preemp_not_preemp {
            self.statistics.preemp_frames += 1;
        }

        if !self.initial_disc_time_set {
            self.try_set_initial_disc_time(&section);
        }

        if !self.initial_disc_time_set {
            // Still not set: this section is disregarded entirely (no time base to anchor it).
            return;
        }

        let current_disc_time = self.resolve_current_disc_time(&section);

        let section_frame_gap = current_disc_time.difference(self.last_disc_time);
        if section_frame_gap > 1 {
            log::debug!(
                "non-contiguous F3 section, {} sections missing - last disc time {}, current {}",
                section_frame_gap - 1,
                self.last_disc_time,
                current_disc_time
            );
            self.statistics.sequence_interruptions += 1;
            self.statistics.missing_f3_frames += (section_frame_gap as u64 - 1) * FRAMES_PER_SECTION as u64;
            self.c1.flush();
            self.c2.flush();
            self.c2_deinterleave.flush();
            self.section_buffer.clear();
            self.section_disc_times.clear();
            self.lost_sections = true;
        }

        self.last_disc_time = current_disc_time;
        self.statistics.current_disc_time = current_disc_time;
        self.section_buffer.push(section);
        self.section_disc_times.push(current_disc_time);

        for frame in section_frames {
            self.push_f3_frame(frame);
            if self.f2_buffer.len() == FRAMES_PER_SECTION {
                f2_out.extend(self.f2_buffer.drain(..));
                self.statistics.total_f2_frames += FRAMES_PER_SECTION as u64;
                self.section_buffer.remove(0);
                self.section_disc_times.remove(0);
            }
        }
    }

    fn try_set_initial_disc_time(&mut self, section: &Section) {
        if self.no_time_stamp {
            let current = TrackTime::default();
            self.statistics.initial_disc_time = current;
            self.last_disc_time = current;
            self.last_disc_time.add_frames(-1);
            log::debug!("no time stamps - initial disc time set to {current}");
            self.initial_disc_time_set = true;
            return;
        }

        if section.has_time_code() && !section.is_lead_in && !section.is_lead_out {
            let current = section.disc_time;
            self.statistics.initial_disc_time = current;
            self.last_disc_time = current;
            self.last_disc_time.add_frames(-1);
            log::debug!("initial disc time is {current}");
            self.initial_disc_time_set = true;
        } else {
            log::debug!("ignoring section (disregards {FRAMES_PER_SECTION} F3 frames)");
        }
    }

    fn resolve_current_disc_time(&mut self, section: &Section) -> TrackTime {
        let current_disc_time = if section.has_time_code() {
            if !self.no_time_stamp {
                section.disc_time
            } else {
                let mut t = self.last_disc_time;
                t.add_frames(1);
                t
            }
        } else {
            let mut t = self.last_disc_time;
            t.add_frames(1);
            log::debug!(
                "section disc time not valid, estimating {t} from last disc time {}",
                self.last_disc_time
            );
            t
        };

        if self.lost_sections {
            log::debug!("first valid time after section loss is {current_disc_time}");
            self.lost_sections = false;
        }
        current_disc_time
    }

    fn push_f3_frame(&mut self, frame: &F3Frame) {
        self.c1.push_f3_frame(&frame.data, &frame.errors);
        let Some(c1_data) = self.c1.data_symbols() else { return };
        let c1_errors = self.c1.error_symbols().expect("error_symbols follows data_symbols");
        self.c2.push_c1(c1_data, c1_errors);

        let Some(c2_data) = self.c2.data_symbols() else { return };
        let c2_errors = self.c2.error_symbols().expect("error_symbols follows data_symbols");
        self.c2_deinterleave.push_c2(c2_data, c2_errors);

        let Some(payload) = self.c2_deinterleave.data_symbols() else { return };
        let payload_errors =
            self.c2_deinterleave.error_symbols().expect("error_symbols follows data_symbols");

        let first_section = self.section_buffer.first();
        let disc_time = self.section_disc_times.first().copied().unwrap_or_default();
        let (track_time, track_number, is_encoder_running) = match first_section {
            Some(s) if s.has_time_code() => (s.track_time, s.track_number, true),
            _ => (TrackTime::default(), 1, true),
        };

        self.f2_buffer.push(F2Frame {
            data: *payload,
            errors: *payload_errors,
            disc_time,
            track_time,
            track_number,
            is_encoder_running,
        });
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;
    use crate::efm::circ::encode_c1_block;
    use crate::util::u8_to_bcd_byte;

    fn q_bytes_for(track: u8, min: u8, sec: u8, frame: u8, disc_min: u8, disc_sec: u8, disc_frame: u8) -> [u8; 12] {
        let mut q = [0u8; 12];
        q[0] = 0x01; // control=0 (no pre-emp, 2ch audio), mode=1
        q[1] = u8_to_bcd_byte(track);
        q[2] = 0x01; // index
        q[3] = u8_to_bcd_byte(min);
        q[4] = u8_to_bcd_byte(sec);
        q[5] = u8_to_bcd_byte(frame);
        q[6] = 0;
        q[7] = u8_to_bcd_byte(disc_min);
        q[8] = u8_to_bcd_byte(disc_sec);
        q[9] = u8_to_bcd_byte(disc_frame);
        let crc = crc16_ccitt(&q[0..10]);
        let inverted = !crc;
        q[10] = (inverted >> 8) as u8;
        q[11] = (inverted & 0xFF) as u8;
        q
    }

    fn section_symbols(q: &[u8; 12]) -> [u8; FRAMES_PER_SECTION] {
        let mut symbols = [0u8; FRAMES_PER_SECTION];
        for i in 0..96 {
            let bit = (q[i / 8] >> (7 - (i % 8))) & 1;
            symbols[i + 2] = bit << 6;
        }
        symbols
    }

    #[googletest::test]
    fn test_section_round_trips_qmode1() {
        let q = q_bytes_for(1, 0, 0, 0, 0, 1, 10);
        let symbols = section_symbols(&q);
        let section = Section::from_subcode_symbols(&symbols);
        expect_that!(section.crc_valid, eq(true));
        expect_that!(section.q_mode, eq(1));
        expect_that!(section.track_number, eq(1));
        expect_that!(section.disc_time.minutes(), eq(0));
        expect_that!(section.disc_time.seconds(), eq(1));
        expect_that!(section.disc_time.frame(), eq(10));
    }

    #[googletest::test]
    fn test_section_rejects_bad_crc() {
        let mut q = q_bytes_for(1, 0, 0, 0, 0, 0, 0);
        q[11] ^= 0xFF;
        let symbols = section_symbols(&q);
        let section = Section::from_subcode_symbols(&symbols);
        expect_that!(section.crc_valid, eq(false));
    }

    #[googletest::test]
    fn test_track_time_arithmetic() {
        let mut t = TrackTime::new(1, 30, 5);
        expect_that!(t.minutes(), eq(1));
        expect_that!(t.seconds(), eq(30));
        expect_that!(t.frame(), eq(5));
        t.add_frames(1);
        expect_that!(t.frame(), eq(6));
        let earlier = TrackTime::new(1, 30, 0);
        expect_that!(t.difference(earlier), eq(6));
    }

    fn section_frames(q: &[u8; 12], payload: [u8; 28]) -> Vec<F3Frame> {
        let symbols = section_symbols(q);
        let block = encode_c1_block(&payload);
        (0..FRAMES_PER_SECTION)
            .map(|i| F3Frame { data: block, errors: [false; 32], subcode_symbol: symbols[i] })
            .collect()
    }

    #[googletest::test]
    fn test_process_no_output_before_buffers_fill() {
        let mut conv = F3ToF2Converter::new(true);
        let q = q_bytes_for(1, 0, 0, 0, 0, 0, 0);
        let frames = section_frames(&q, core::array::from_fn(|i| i as u8));
        let f2 = conv.process(&frames);
        expect_that!(f2, empty());
        expect_that!(conv.statistics().total_f3_frames, eq(FRAMES_PER_SECTION as u64));
    }

    #[googletest::test]
    #[should_panic(expected = "not a multiple of")]
    fn test_process_rejects_partial_section() {
        let mut conv = F3ToF2Converter::new(true);
        let frames = vec![F3Frame { data: [0; 32], errors: [false; 32], subcode_symbol: 0 }; 10];
        conv.process(&frames);
    }
}
