//! EFM data path: CIRC (Cross-Interleaved Reed-Solomon Code) error correction and F3→F2 frame
//! assembly, the byte-accurate counterpart to the analog [`crate::chroma`] decoder.
//!
//! Data flows through three stages, each a small statistics-tracking state machine fed one
//! element at a time:
//!
//! 1. [`circ::C1Circ`] interleaves pairs of F3 frames and corrects up to 2 symbols per 32-symbol
//!    block (RS(32,28)).
//! 2. [`circ::C2Circ`] interleaves C1 output through a 109-element delay buffer and corrects up
//!    to 4 symbols per 28-symbol block (RS(28,24)).
//! 3. [`circ::C2Deinterleave`] removes the C2 interleave's residual delay skew to produce the
//!    final 24-symbol F2 payload.
//!
//! [`f3_to_f2::F3ToF2Converter`] drives all three stages across a stream of F3 frames grouped
//! into 98-frame sections, tracking disc time from the Q-channel subcode and recovering from
//! sync loss.

pub mod circ;
pub mod f3_to_f2;
mod rs;

pub use circ::{C1Circ, C2Circ, C2Deinterleave};
pub use f3_to_f2::{F2Frame, F3Frame, F3ToF2Converter, F3ToF2Statistics, Section, TrackTime};
