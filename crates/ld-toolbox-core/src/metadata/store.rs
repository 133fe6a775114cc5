use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};

use super::{FieldMetadata, ValidVideoParameters, VideoParameters};

/// Schema version written by this crate.  A document whose `schema_version` does not match is
/// rejected rather than guessed at: the per-field record layout is not guaranteed compatible
/// across versions.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// The JSON-backed side-car document: one [`VideoParameters`] record plus one [`FieldMetadata`]
/// per field, in capture order.
///
/// Fields are addressed by their 1-based `seq_no`, which is also their position (`seq_no - 1`)
/// in the backing vector; [`MetadataStore`] maintains this invariant on every mutation.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    video_parameters: ValidVideoParameters,
    is_first_field_first: bool,
    fields: Vec<FieldMetadata>,
}

fn default_is_first_field_first() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataDocument {
    schema_version: u32,
    video_parameters: VideoParameters,
    /// Whether frame `k`'s first field (in capture/playback order) is `2k - 1` (`true`) or `2k`
    /// (`false`). Missing in an older document defaults to `true`, the common case.
    #[serde(default = "default_is_first_field_first")]
    is_first_field_first: bool,
    fields: Vec<FieldMetadata>,
}

/// Result type for calls on [`MetadataStore`].
pub type MetadataResult<T, E = MetadataError> = std::result::Result<T, E>;

/// Error type for calls on [`MetadataStore`].
#[derive(Debug, Snafu)]
pub struct MetadataError(InnerMetadataError);

#[derive(Debug, Snafu)]
enum InnerMetadataError {
    #[snafu(display("could not open metadata file {}", path.display()))]
    Open { path: std::path::PathBuf, source: std::io::Error },

    #[snafu(display("could not read metadata JSON from {}", path.display()))]
    Read { path: std::path::PathBuf, source: serde_json::Error },

    #[snafu(display("could not create metadata file {}", path.display()))]
    Create { path: std::path::PathBuf, source: std::io::Error },

    #[snafu(display("could not write metadata JSON to {}", path.display()))]
    Write { path: std::path::PathBuf, source: serde_json::Error },

    #[snafu(display(
        "metadata file has schema version {found}, but this build only understands version \
        {CURRENT_SCHEMA_VERSION}"
    ))]
    SchemaVersion { found: u32 },

    #[snafu(display("video parameters in metadata file failed validation"))]
    InvalidVideoParameters { source: garde::Report },

    #[snafu(display("fields are not stored in contiguous seq_no order starting at 1"))]
    OutOfOrderFields,

    #[snafu(display("no field exists with seq_no {seq_no}"))]
    NoSuchField { seq_no: u32 },

    #[snafu(display("no field exists for frame number {frame_no}"))]
    NoSuchFrame { frame_no: u32 },
}

impl MetadataStore {
    /// Create a new, empty store for a capture with the given video parameters.
    ///
    /// `is_first_field_first` fixes the frame-to-field mapping for the lifetime of the store:
    /// when `true`, frame `k` maps to fields `(2k - 1, 2k)`; when `false`, `(2k, 2k - 1)`.
    pub fn new(video_parameters: ValidVideoParameters, is_first_field_first: bool) -> MetadataStore {
        MetadataStore { video_parameters, is_first_field_first, fields: Vec::new() }
    }

    /// Read a metadata document from a JSON file.
    pub fn read<P: AsRef<Path>>(path: P) -> MetadataResult<MetadataStore> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|_| OpenSnafu { path: path.to_path_buf() })?;
        let doc: MetadataDocument = serde_json::from_reader(BufReader::new(file))
            .with_context(|_| ReadSnafu { path: path.to_path_buf() })?;
        if doc.schema_version != CURRENT_SCHEMA_VERSION {
            SchemaVersionSnafu { found: doc.schema_version }.fail()?;
        }
        if doc.fields.iter().enumerate().any(|(i, f)| f.seq_no != (i as u32) + 1) {
            OutOfOrderFieldsSnafu.fail()?;
        }
        let video_parameters =
            doc.video_parameters.validated().context(InvalidVideoParametersSnafu)?;
        Ok(MetadataStore {
            video_parameters,
            is_first_field_first: doc.is_first_field_first,
            fields: doc.fields,
        })
    }

    /// Write this store out as a JSON metadata document.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> MetadataResult<()> {
        let path = path.as_ref();
        let doc = MetadataDocument {
            schema_version: CURRENT_SCHEMA_VERSION,
            video_parameters: *self.video_parameters.as_ref(),
            is_first_field_first: self.is_first_field_first,
            fields: self.fields.clone(),
        };
        let file = File::create(path)
            .with_context(|_| CreateSnafu { path: path.to_path_buf() })
            .map_err(MetadataError)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &doc)
            .with_context(|_| WriteSnafu { path: path.to_path_buf() })
            .map_err(MetadataError)?;
        Ok(())
    }

    /// The video parameters this capture was recorded with.
    pub fn video_parameters(&self) -> &ValidVideoParameters {
        &self.video_parameters
    }

    /// Number of fields currently recorded.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Number of whole frames: one less than [`MetadataStore::field_count`] divided by two,
    /// rounded down, since a trailing unpaired field does not form a complete frame.
    pub fn get_number_of_frames(&self) -> usize {
        self.fields.len() / 2
    }

    /// Look up a field by its 1-based sequence number.
    pub fn get_field(&self, seq_no: u32) -> MetadataResult<&FieldMetadata> {
        self.fields
            .get(seq_no.wrapping_sub(1) as usize)
            .context(NoSuchFieldSnafu { seq_no })
            .map_err(MetadataError)
    }

    /// Replace the field at `field.seq_no` with `field`.  The field must already exist.
    pub fn update_field(&mut self, field: FieldMetadata) -> MetadataResult<()> {
        let index = field.seq_no.wrapping_sub(1) as usize;
        let slot = self
            .fields
            .get_mut(index)
            .context(NoSuchFieldSnafu { seq_no: field.seq_no })
            .map_err(MetadataError)?;
        *slot = field;
        Ok(())
    }

    /// Append a new field, which must use the next sequential `seq_no`.
    pub fn append_field(&mut self, field: FieldMetadata) -> MetadataResult<()> {
        let expected = (self.fields.len() as u32) + 1;
        if field.seq_no != expected {
            NoSuchFieldSnafu { seq_no: field.seq_no }.fail()?;
        }
        self.fields.push(field);
        Ok(())
    }

    /// `seq_no` of frame `frame_no`'s first field (1-based), per §4.A: when
    /// [`MetadataStore::is_first_field_first`] is `true`, frame `k` maps to fields
    /// `(2k - 1, 2k)`; otherwise `(2k, 2k - 1)`.
    pub fn get_first_field_number(&self, frame_no: u32) -> MetadataResult<u32> {
        if frame_no == 0 {
            NoSuchFrameSnafu { frame_no }.fail()?;
        }
        let seq_no = if self.is_first_field_first { 2 * frame_no - 1 } else { 2 * frame_no };
        self.get_field(seq_no)?;
        Ok(seq_no)
    }

    /// `seq_no` of frame `frame_no`'s second field (1-based); see
    /// [`MetadataStore::get_first_field_number`].
    pub fn get_second_field_number(&self, frame_no: u32) -> MetadataResult<u32> {
        if frame_no == 0 {
            NoSuchFrameSnafu { frame_no }.fail()?;
        }
        let seq_no = if self.is_first_field_first { 2 * frame_no } else { 2 * frame_no - 1 };
        self.get_field(seq_no)?;
        Ok(seq_no)
    }

    /// Whether frame `k`'s first field (in capture order) is `2k - 1` (`true`, the common case)
    /// or `2k` (`false`).
    pub fn is_first_field_first(&self) -> bool {
        self.is_first_field_first
    }
}

/// Converts a CLV programme time code into a zero-based frame number within its second, given the
/// picture rate.
///
/// LaserDisc CLV discs carry `hour:minute:second` in the VBI but not a running frame count, so
/// frame-accurate seeking needs the within-second picture number (when present) combined with the
/// overall frame rate to compute an absolute frame offset from the start of the programme.
pub fn convert_clv_timecode_to_frame_number(
    hour: u8,
    minute: u8,
    second: u8,
    clv_picture_number: Option<u8>,
    frames_per_second: u32,
) -> u64 {
    let total_seconds = u64::from(hour) * 3600 + u64::from(minute) * 60 + u64::from(second);
    total_seconds * u64::from(frames_per_second) + u64::from(clv_picture_number.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;
    use crate::metadata::testutil::ntsc_video_parameters;

    fn new_store() -> MetadataStore {
        MetadataStore::new(ntsc_video_parameters().validated().unwrap(), true)
    }

    #[googletest::test]
    fn test_append_and_get_field() {
        let mut store = new_store();
        store.append_field(FieldMetadata::new(1, true)).unwrap();
        store.append_field(FieldMetadata::new(2, false)).unwrap();
        expect_that!(store.field_count(), eq(2));
        expect_that!(store.get_field(1).unwrap().is_first_field, eq(true));
        expect_that!(store.get_number_of_frames(), eq(1));
    }

    #[googletest::test]
    fn test_append_out_of_sequence_rejected() {
        let mut store = new_store();
        expect_that!(store.append_field(FieldMetadata::new(2, true)), err(anything()));
    }

    #[googletest::test]
    fn test_get_missing_field_fails() {
        let store = new_store();
        expect_that!(store.get_field(1), err(anything()));
    }

    #[googletest::test]
    fn test_update_field() {
        let mut store = new_store();
        store.append_field(FieldMetadata::new(1, true)).unwrap();
        let mut field = store.get_field(1).unwrap().clone();
        field.sync_conf = 42;
        store.update_field(field).unwrap();
        expect_that!(store.get_field(1).unwrap().sync_conf, eq(42));
    }

    #[googletest::test]
    fn test_first_and_second_field_number_when_first_field_first() {
        let mut store = new_store();
        store.append_field(FieldMetadata::new(1, true)).unwrap();
        store.append_field(FieldMetadata::new(2, false)).unwrap();
        expect_that!(store.get_first_field_number(1), ok(eq(1)));
        expect_that!(store.get_second_field_number(1), ok(eq(2)));
    }

    #[googletest::test]
    fn test_first_and_second_field_number_when_second_field_first() {
        let mut store = MetadataStore::new(ntsc_video_parameters().validated().unwrap(), false);
        store.append_field(FieldMetadata::new(1, false)).unwrap();
        store.append_field(FieldMetadata::new(2, true)).unwrap();
        expect_that!(store.get_first_field_number(1), ok(eq(2)));
        expect_that!(store.get_second_field_number(1), ok(eq(1)));
    }

    #[googletest::test]
    fn test_field_number_zero_is_rejected() {
        let store = new_store();
        expect_that!(store.get_first_field_number(0), err(anything()));
        expect_that!(store.get_second_field_number(0), err(anything()));
    }

    #[googletest::test]
    fn test_convert_clv_timecode_to_frame_number() {
        // 1 hour, 2 minutes, 3 seconds, picture 10, at 30 frames/sec.
        let frame = convert_clv_timecode_to_frame_number(1, 2, 3, Some(10), 30);
        expect_that!(frame, eq(3723 * 30 + 10));
    }
}
