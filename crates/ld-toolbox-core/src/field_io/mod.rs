//! Raw TBC field storage: fixed-stride reads and writes of 16-bit little-endian samples.
//!
//! This layer performs no interpretation of samples — it only knows how to carve a byte stream
//! into `fieldWidth × fieldHeight` chunks. Field numbering is 1-based throughout, matching
//! [`crate::metadata::FieldMetadata::seq_no`].

use std::io::{Read, Seek, SeekFrom, Write};

use snafu::{ResultExt, Snafu};

use crate::ioutil::retry_if_interrupted;
use crate::metadata::VideoParameters;

#[cfg(test)]
mod tests;

/// Result type for calls on [`FieldReader`]/[`FieldWriter`].
pub type FieldIoResult<T, E = FieldIoError> = std::result::Result<T, E>;

/// Error type for calls on [`FieldReader`]/[`FieldWriter`].
#[derive(Debug, Snafu)]
pub struct FieldIoError(InnerFieldIoError);

#[derive(Debug, Snafu)]
enum InnerFieldIoError {
    #[snafu(display("could not seek to field {seq_no}"))]
    Seek { seq_no: u32, source: std::io::Error },

    #[snafu(display("could not read field {seq_no}"))]
    Read { seq_no: u32, source: std::io::Error },

    #[snafu(display(
        "short read on field {seq_no}: expected {expected} samples, got {actual}"
    ))]
    ShortRead { seq_no: u32, expected: usize, actual: usize },

    #[snafu(display("could not write field"))]
    Write { source: std::io::Error },

    #[snafu(display("field {seq_no} has {actual} samples, expected exactly {expected}"))]
    WrongLength { seq_no: u32, expected: usize, actual: usize },
}

/// Number of 16-bit samples in one field, given its geometry.
fn samples_per_field(video_parameters: &VideoParameters) -> usize {
    (video_parameters.field_width as usize) * (video_parameters.field_height as usize)
}

/// Random-access reader over a byte file of concatenated fields.
///
/// `getVideoField`'s random-access contract: any 1-based field number may be requested in any
/// order.  Use [`FieldReader::read_field_in_order`] instead when the underlying reader is a pipe,
/// which cannot seek backwards.
#[derive(Debug)]
pub struct FieldReader<R> {
    reader: R,
    samples_per_field: usize,
    next_seq_no: u32,
}

impl<R: Read + Seek> FieldReader<R> {
    /// Wrap a reader, using `video_parameters` to determine the field stride.
    pub fn new(reader: R, video_parameters: &VideoParameters) -> FieldReader<R> {
        FieldReader { reader, samples_per_field: samples_per_field(video_parameters), next_seq_no: 1 }
    }

    /// Read one field by its 1-based sequence number, seeking as needed.
    ///
    /// Returns exactly `samples_per_field` 16-bit samples, or [`InnerFieldIoError::ShortRead`] if
    /// fewer were available (a truncated file, not a clean EOF at a field boundary).
    pub fn read_field(&mut self, seq_no: u32) -> FieldIoResult<Vec<u16>> {
        let stride_bytes = (self.samples_per_field as u64) * 2;
        let offset = u64::from(seq_no - 1) * stride_bytes;
        retry_if_interrupted(|| self.reader.seek(SeekFrom::Start(offset)))
            .context(SeekSnafu { seq_no })?;
        self.read_current_field(seq_no)
    }

    /// Read the next field in strictly ascending order, without seeking.
    ///
    /// This is the only access pattern a piped source supports; callers sequencing worker tasks
    /// against a pipe must call this exactly once per field, in order.
    pub fn read_field_in_order(&mut self) -> FieldIoResult<Vec<u16>> {
        let seq_no = self.next_seq_no;
        let field = self.read_current_field(seq_no)?;
        self.next_seq_no += 1;
        Ok(field)
    }

    fn read_current_field(&mut self, seq_no: u32) -> FieldIoResult<Vec<u16>> {
        let mut raw = vec![0u8; self.samples_per_field * 2];
        let mut total_read = 0;
        loop {
            let n = retry_if_interrupted(|| self.reader.read(&mut raw[total_read..]))
                .context(ReadSnafu { seq_no })?;
            if n == 0 {
                break;
            }
            total_read += n;
            if total_read == raw.len() {
                break;
            }
        }
        if total_read != raw.len() {
            ShortReadSnafu { seq_no, expected: self.samples_per_field, actual: total_read / 2 }
                .fail()?;
        }
        Ok(raw.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])).collect())
    }
}

/// Sequential writer over a byte file of concatenated fields.
///
/// Unlike [`FieldReader`], the output side has no random-access requirement: the emitter (see
/// [`crate::pipeline`]) always writes fields in strictly ascending frame order.
#[derive(Debug)]
pub struct FieldWriter<W> {
    writer: W,
    samples_per_field: usize,
}

impl<W: Write> FieldWriter<W> {
    /// Wrap a writer, using `video_parameters` to determine the expected field length.
    pub fn new(writer: W, video_parameters: &VideoParameters) -> FieldWriter<W> {
        FieldWriter { writer, samples_per_field: samples_per_field(video_parameters) }
    }

    /// Write one field's samples, in order.  `samples` must have exactly
    /// `fieldWidth × fieldHeight` elements.
    pub fn write_field(&mut self, seq_no: u32, samples: &[u16]) -> FieldIoResult<()> {
        if samples.len() != self.samples_per_field {
            WrongLengthSnafu { seq_no, expected: self.samples_per_field, actual: samples.len() }
                .fail()?;
        }
        let mut raw = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            raw.extend_from_slice(&sample.to_le_bytes());
        }
        retry_if_interrupted(|| self.writer.write_all(&raw)).context(WriteSnafu)?;
        Ok(())
    }

    /// Flush any buffered output.
    pub fn flush(&mut self) -> FieldIoResult<()> {
        retry_if_interrupted(|| self.writer.flush()).context(WriteSnafu)
    }
}
