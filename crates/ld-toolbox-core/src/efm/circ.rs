//! C1/C2 CIRC (Cross-Interleaved Reed-Solomon Code) stages.
//!
//! Grounded on IEC 60908 figure 13 (the CIRC encoder/decoder block diagram): C1 is RS(32,28)
//! applied across a one-frame interleave, C2 is RS(28,24) applied across a much longer
//! cross-interleave (delay multiples of 4 frames, up to 108 frames), and a final short
//! deinterleave undoes the last of C2's delay skew to land the 24 payload symbols back in frame
//! order.

use super::rs::{rs_decode, rs_encode};

/// Running totals for one CIRC stage, reported by [`crate::pipeline`] alongside the rest of a
/// decode run's statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircStatistics {
    /// Blocks that needed no correction.
    pub passed: u64,
    /// Blocks corrected without exceeding the stage's erasure limit.
    pub corrected: u64,
    /// Blocks that could not be corrected and were emitted as a full erasure.
    pub failed: u64,
    /// Number of times the stage's delay buffers were flushed (e.g. on section sync loss).
    pub flushed: u64,
}

impl CircStatistics {
    fn record(&mut self, fixed: Option<usize>) {
        match fixed {
            Some(0) => self.passed += 1,
            Some(_) => {
                self.passed += 1;
                self.corrected += 1;
            }
            None => self.failed += 1,
        }
    }
}

/// C1 CIRC stage: RS(32,28) over a one-frame interleave of the current and previous F3 frame.
///
/// F3 frames are pushed one at a time. A C1 block becomes available only once two frames have
/// been seen (the interleave spans both), so the first `push` after a [`C1Circ::flush`] produces
/// no output.
#[derive(Debug)]
pub struct C1Circ {
    current: [u8; 32],
    current_errors: [bool; 32],
    previous: [u8; 32],
    previous_errors: [bool; 32],
    buffer_level: u32,
    output_data: [u8; 28],
    output_errors: [bool; 28],
    statistics: CircStatistics,
}

impl Default for C1Circ {
    fn default() -> Self {
        Self::new()
    }
}

impl C1Circ {
    /// Construct a stage with empty buffers and zeroed statistics.
    pub fn new() -> Self {
        C1Circ {
            current: [0; 32],
            current_errors: [false; 32],
            previous: [0; 32],
            previous_errors: [false; 32],
            buffer_level: 0,
            output_data: [0; 28],
            output_errors: [false; 28],
            statistics: CircStatistics::default(),
        }
    }

    /// Flush the delay buffer and zero the output, without touching the running statistics.
    pub fn flush(&mut self) {
        self.current = [0; 32];
        self.current_errors = [false; 32];
        self.previous = [0; 32];
        self.previous_errors = [false; 32];
        self.output_data = [0; 28];
        self.output_errors = [false; 28];
        self.buffer_level = 0;
        self.statistics.flushed += 1;
    }

    /// Reset statistics and flush the delay buffer.
    pub fn reset(&mut self) {
        self.flush();
        self.statistics = CircStatistics::default();
    }

    /// Accumulated statistics since construction (or the last [`C1Circ::reset`]).
    pub fn statistics(&self) -> CircStatistics {
        self.statistics
    }

    /// Push one F3 frame's 32 data symbols and per-symbol error flags.
    ///
    /// Once the delay buffer holds two frames, [`C1Circ::data_symbols`] and
    /// [`C1Circ::error_symbols`] return the newly produced C1 block.
    pub fn push_f3_frame(&mut self, data: &[u8; 32], errors: &[bool; 32]) {
        self.previous = self.current;
        self.previous_errors = self.current_errors;
        self.current = *data;
        self.current_errors = *errors;

        self.buffer_level = (self.buffer_level + 1).min(2);
        if self.buffer_level > 1 {
            self.interleave_and_correct();
        }
    }

    /// The 28 C1 data symbols from the most recent [`C1Circ::push_f3_frame`], if a block has been
    /// produced yet.
    pub fn data_symbols(&self) -> Option<&[u8; 28]> {
        (self.buffer_level > 1).then_some(&self.output_data)
    }

    /// The 28 C1 per-symbol erasure flags from the most recent [`C1Circ::push_f3_frame`].
    pub fn error_symbols(&self) -> Option<&[bool; 28]> {
        (self.buffer_level > 1).then_some(&self.output_errors)
    }

    fn interleave_and_correct(&mut self) {
        let mut interleaved = [0u8; 32];
        let mut interleaved_errors = [false; 32];
        for byte_c in (0..32).step_by(2) {
            interleaved[byte_c] = self.current[byte_c];
            interleaved[byte_c + 1] = self.previous[byte_c + 1];
            interleaved_errors[byte_c] = self.current_errors[byte_c];
            interleaved_errors[byte_c + 1] = self.previous_errors[byte_c + 1];
        }

        // Invert the Qm (12-15) and Pm (28-31) parity symbols, per IEC 60908's CIRC definition.
        for i in 12..16 {
            interleaved[i] ^= 0xFF;
        }
        for i in 28..32 {
            interleaved[i] ^= 0xFF;
        }

        let erasures: Vec<usize> =
            (0..32).filter(|&i| interleaved_errors[i]).collect();

        let fixed = if erasures.len() <= 2 {
            let mut data = interleaved;
            let mut fixed = rs_decode(&mut data, 4, &erasures);
            // More than 2 symbols corrected (beyond the erasures supplied) means C1's actual
            // error-correcting power has been exceeded: treat the block as a failure.
            if fixed.is_some_and(|f| f > 2) {
                fixed = None;
            }
            match fixed {
                Some(_) => {
                    self.output_data.copy_from_slice(&data[..28]);
                    self.output_errors = [false; 28];
                }
                None => {
                    self.output_data.copy_from_slice(&interleaved[..28]);
                    self.output_errors = [true; 28];
                }
            }
            fixed
        } else {
            // More input erasures than C1 can ever correct: pass the data through flagged.
            self.output_data.copy_from_slice(&interleaved[..28]);
            self.output_errors = [true; 28];
            None
        };

        self.statistics.record(fixed);
    }
}

/// One C1 block, as stored in [`C2Circ`]'s 109-element delay buffer.
#[derive(Debug, Clone, Copy)]
struct C1Element {
    data: [u8; 28],
    errors: [bool; 28],
}

/// C2 CIRC stage: RS(28,24) over a cross-interleave with per-symbol delays in multiples of 4
/// frames (up to 108), undoing the disc's cross-interleave so that each C2 block's 28 symbols
/// originally came from 28 different C1 blocks.
#[derive(Debug)]
pub struct C2Circ {
    delay_buffer: Vec<C1Element>,
    output_data: [u8; 28],
    output_errors: [bool; 28],
    statistics: CircStatistics,
}

impl Default for C2Circ {
    fn default() -> Self {
        Self::new()
    }
}

const C2_DELAY_BUFFER_LEN: usize = 109;

impl C2Circ {
    /// Construct a stage with an empty delay buffer and zeroed statistics.
    pub fn new() -> Self {
        C2Circ {
            delay_buffer: Vec::with_capacity(C2_DELAY_BUFFER_LEN),
            output_data: [0; 28],
            output_errors: [false; 28],
            statistics: CircStatistics::default(),
        }
    }

    /// Flush the delay buffer and zero the output, without touching the running statistics.
    pub fn flush(&mut self) {
        self.delay_buffer.clear();
        self.output_data = [0; 28];
        self.output_errors = [false; 28];
        self.statistics.flushed += 1;
    }

    /// Reset statistics and flush the delay buffer.
    pub fn reset(&mut self) {
        self.flush();
        self.statistics = CircStatistics::default();
    }

    /// Accumulated statistics since construction (or the last [`C2Circ::reset`]).
    pub fn statistics(&self) -> CircStatistics {
        self.statistics
    }

    /// Push one C1 block's 28 data symbols and erasure flags.
    ///
    /// Once the delay buffer holds 109 blocks, [`C2Circ::data_symbols`] and
    /// [`C2Circ::error_symbols`] return the newly produced C2 block.
    pub fn push_c1(&mut self, data: &[u8; 28], errors: &[bool; 28]) {
        self.delay_buffer.push(C1Element { data: *data, errors: *errors });
        if self.delay_buffer.len() >= C2_DELAY_BUFFER_LEN {
            if self.delay_buffer.len() > C2_DELAY_BUFFER_LEN {
                self.delay_buffer.remove(0);
            }
            self.interleave_and_correct();
        }
    }

    /// The 28 C2 data symbols from the most recent [`C2Circ::push_c1`], if a block has been
    /// produced yet.
    pub fn data_symbols(&self) -> Option<&[u8; 28]> {
        (self.delay_buffer.len() >= C2_DELAY_BUFFER_LEN).then_some(&self.output_data)
    }

    /// The 28 C2 per-symbol erasure flags from the most recent [`C2Circ::push_c1`].
    pub fn error_symbols(&self) -> Option<&[bool; 28]> {
        (self.delay_buffer.len() >= C2_DELAY_BUFFER_LEN).then_some(&self.output_errors)
    }

    fn interleave_and_correct(&mut self) {
        // Longest delay is 27 * 4 = 108.
        let mut interleaved = [0u8; 28];
        let mut interleaved_errors = [false; 28];
        for byte_c in 0..28 {
            let delay_index = 108 - ((27 - byte_c) * 4);
            interleaved[byte_c] = self.delay_buffer[delay_index].data[byte_c];
            interleaved_errors[byte_c] = self.delay_buffer[delay_index].errors[byte_c];
        }

        let erasures: Vec<usize> =
            (0..28).filter(|&i| interleaved_errors[i]).collect();

        let fixed = if erasures.len() <= 4 {
            let mut data = interleaved;
            let mut fixed = rs_decode(&mut data, 4, &erasures);
            // More than 3 symbols corrected means C2's actual error-correcting power has been
            // exceeded: treat the block as a failure.
            if fixed.is_some_and(|f| f > 3) {
                fixed = None;
            }
            match fixed {
                Some(_) => {
                    self.output_data = data;
                    self.output_errors = [false; 28];
                }
                None => {
                    self.output_data = interleaved;
                    self.output_errors = [true; 28];
                }
            }
            fixed
        } else {
            self.output_data = interleaved;
            self.output_errors = [true; 28];
            None
        };

        self.statistics.record(fixed);
    }
}

/// Final deinterleave stage: a 3-element delay buffer that reassembles 24 F2 payload symbols
/// from the current and two-frames-earlier C2 blocks.
#[derive(Debug)]
pub struct C2Deinterleave {
    delay_buffer: Vec<(([u8; 28], [bool; 28]))>,
    output_data: [u8; 24],
    output_errors: [bool; 24],
    valid: u64,
    invalid: u64,
    flushed: u64,
}

impl Default for C2Deinterleave {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-output-symbol source: `(output index, current-block source index)` pairs read from the
/// current (0-frame-delay) C2 block.
const CURRENT_PAIRS: [(usize, usize); 12] =
    [(0, 0), (1, 1), (2, 6), (3, 7), (8, 2), (9, 3), (10, 8), (11, 9), (16, 4), (17, 5), (18, 10), (19, 11)];

/// Same, read from the two-frames-earlier (2-frame-delay) C2 block.
const PREVIOUS_PAIRS: [(usize, usize); 12] = [
    (4, 16),
    (5, 17),
    (6, 22),
    (7, 23),
    (12, 18),
    (13, 19),
    (14, 24),
    (15, 25),
    (20, 20),
    (21, 21),
    (22, 26),
    (23, 27),
];

impl C2Deinterleave {
    /// Construct a stage with an empty delay buffer and zeroed statistics.
    pub fn new() -> Self {
        C2Deinterleave {
            delay_buffer: Vec::with_capacity(3),
            output_data: [0; 24],
            output_errors: [false; 24],
            valid: 0,
            invalid: 0,
            flushed: 0,
        }
    }

    /// Flush the delay buffer and zero the output, without touching the running statistics.
    pub fn flush(&mut self) {
        self.delay_buffer.clear();
        self.output_data = [0; 24];
        self.output_errors = [false; 24];
        self.flushed += 1;
    }

    /// Reset statistics and flush the delay buffer.
    pub fn reset(&mut self) {
        self.flush();
        self.valid = 0;
        self.invalid = 0;
        self.flushed = 0;
    }

    /// Accumulated statistics since construction (or the last [`C2Deinterleave::reset`]).
    ///
    /// Reuses [`CircStatistics`]'s shape: `corrected` is always zero (deinterleaving performs no
    /// error correction of its own), `passed`/`failed` count fully-valid vs. any-erasure blocks.
    pub fn statistics(&self) -> CircStatistics {
        CircStatistics { passed: self.valid, corrected: 0, failed: self.invalid, flushed: self.flushed }
    }

    /// Push one C2 block's 28 data symbols and erasure flags.
    ///
    /// Once the delay buffer holds 3 blocks, [`C2Deinterleave::data_symbols`] and
    /// [`C2Deinterleave::error_symbols`] return the newly produced F2 payload.
    pub fn push_c2(&mut self, data: &[u8; 28], errors: &[bool; 28]) {
        self.delay_buffer.push((*data, *errors));
        if self.delay_buffer.len() >= 3 {
            if self.delay_buffer.len() > 3 {
                self.delay_buffer.remove(0);
            }
            self.deinterleave();
        }
    }

    /// The 24 F2 payload symbols from the most recent [`C2Deinterleave::push_c2`], if available.
    pub fn data_symbols(&self) -> Option<&[u8; 24]> {
        (self.delay_buffer.len() >= 3).then_some(&self.output_data)
    }

    /// The 24 F2 per-symbol erasure flags from the most recent [`C2Deinterleave::push_c2`].
    pub fn error_symbols(&self) -> Option<&[bool; 24]> {
        (self.delay_buffer.len() >= 3).then_some(&self.output_errors)
    }

    fn deinterleave(&mut self) {
        let (curr_data, curr_errors) = &self.delay_buffer[2];
        let (prev_data, prev_errors) = &self.delay_buffer[0];

        for &(out, src) in &CURRENT_PAIRS {
            self.output_data[out] = curr_data[src];
            self.output_errors[out] = curr_errors[src];
        }
        for &(out, src) in &PREVIOUS_PAIRS {
            self.output_data[out] = prev_data[src];
            self.output_errors[out] = prev_errors[src];
        }

        if self.output_errors.iter().any(|&e| e) {
            self.invalid += 1;
        } else {
            self.valid += 1;
        }
    }
}

/// Encode 28 data symbols into a 32-symbol C1 block (4 RS parity symbols, Qm/Pm inverted), the
/// inverse of the decode path's `interleave_and_correct` minus the cross-frame interleave. Used
/// by the test oracle and by anything that needs to synthesize valid EFM test data.
pub fn encode_c1_block(data: &[u8; 28]) -> [u8; 32] {
    let mut block = [0u8; 32];
    let codeword = rs_encode(data, 4);
    block[..32].copy_from_slice(&codeword);
    // On-disc F3 frames carry the Qm (12-15) and Pm (28-31) parity mirrors pre-inverted; the
    // decode side inverts them back before running RS, so a round-trip fixture needs the same
    // inversion applied going in.
    for i in 12..16 {
        block[i] ^= 0xFF;
    }
    for i in 28..32 {
        block[i] ^= 0xFF;
    }
    block
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn test_c1_circ_no_output_until_two_frames() {
        let mut c1 = C1Circ::new();
        c1.push_f3_frame(&[0; 32], &[false; 32]);
        expect_that!(c1.data_symbols(), none());
    }

    #[googletest::test]
    fn test_c1_circ_passes_clean_data() {
        let mut c1 = C1Circ::new();
        let payload = core::array::from_fn(|i| i as u8);
        let block = encode_c1_block(&payload);
        c1.push_f3_frame(&block, &[false; 32]);
        c1.push_f3_frame(&block, &[false; 32]);
        let data = c1.data_symbols().expect("C1 block should be available");
        expect_that!(data, eq(&payload));
        expect_that!(c1.statistics().failed, eq(0));
    }

    #[googletest::test]
    fn test_c1_circ_too_many_erasures_flags_output() {
        let mut c1 = C1Circ::new();
        c1.push_f3_frame(&[0; 32], &[true; 32]);
        c1.push_f3_frame(&[0; 32], &[true; 32]);
        let errors = c1.error_symbols().expect("C1 block should be available");
        expect_that!(errors, each(eq(true)));
        expect_that!(c1.statistics().failed, eq(1));
    }

    #[googletest::test]
    fn test_c2_circ_no_output_until_109_blocks() {
        let mut c2 = C2Circ::new();
        for _ in 0..108 {
            c2.push_c1(&[0; 28], &[false; 28]);
        }
        expect_that!(c2.data_symbols(), none());
        c2.push_c1(&[0; 28], &[false; 28]);
        expect_that!(c2.data_symbols(), some(anything()));
    }

    #[googletest::test]
    fn test_c1_circ_flush_resets_buffer_level() {
        let mut c1 = C1Circ::new();
        c1.push_f3_frame(&[0; 32], &[false; 32]);
        c1.push_f3_frame(&[0; 32], &[false; 32]);
        expect_that!(c1.data_symbols(), some(anything()));
        c1.flush();
        expect_that!(c1.data_symbols(), none());
        expect_that!(c1.statistics().flushed, eq(1));
    }

    #[googletest::test]
    fn test_c2_deinterleave_no_output_until_three_blocks() {
        let mut d = C2Deinterleave::new();
        d.push_c2(&[0; 28], &[false; 28]);
        d.push_c2(&[0; 28], &[false; 28]);
        expect_that!(d.data_symbols(), none());
        d.push_c2(&[0; 28], &[false; 28]);
        expect_that!(d.data_symbols(), some(anything()));
    }

    #[googletest::test]
    fn test_c2_deinterleave_valid_block_counts_as_passed() {
        let mut d = C2Deinterleave::new();
        for _ in 0..3 {
            d.push_c2(&[0; 28], &[false; 28]);
        }
        expect_that!(d.statistics().passed, eq(1));
        expect_that!(d.statistics().failed, eq(0));
    }
}
