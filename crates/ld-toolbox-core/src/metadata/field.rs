use serde::{Deserialize, Serialize};

/// A run of pixels on one field line whose source data is known-bad.
///
/// `start_x`/`end_x` are sample-column indices; `field_line` is 1-based, in range
/// `[1, field_height]`.  A run that reaches the edge of the field is closed at `field_width`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dropout {
    /// First sample column affected (inclusive).
    pub start_x: u32,
    /// One past the last sample column affected (exclusive).
    pub end_x: u32,
    /// 1-based field line number.
    pub field_line: u32,
}

/// Raw and decoded VBI biphase data recovered from lines 16-18 (PAL) or their NTSC equivalents.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VbiData {
    /// The three raw 24-bit biphase words from lines 16, 17, and 18, in that order.  A word of
    /// zero means decoding that line failed.
    pub vbi_data: [u32; 3],
    /// Whether any of the three lines decoded successfully.
    pub in_use: bool,
}

/// Disc addressing scheme encoded in the programme status code.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum DiscType {
    /// Constant Angular Velocity: frames are addressed by picture number.
    Cav,
    /// Constant Linear Velocity: frames are addressed by a running programme time code.
    Clv,
}

/// Composite-24-bit-word interpretation of [`VbiData`], per IEC 60586/60587 section 10.1.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedVbi {
    /// CAV picture number, BCD-decoded, in range `[1, 79999]`.
    pub picture_number: Option<u32>,
    /// Chapter number decoded from an `800DDD` pattern.
    pub chapter_number: Option<u32>,
    /// CLV programme time code, as `(hour, minute, second)`.
    pub clv_programme_time_code: Option<(u8, u8, u8)>,
    /// CLV picture number (frame-within-second index), when present.
    pub clv_picture_number: Option<u8>,
    /// Disc addressing scheme, once it can be inferred from a lead-in/CLV marker.
    pub disc_type: Option<DiscType>,
    /// Hamming-corrected programme status code, when a valid one was found.
    pub programme_status_code: Option<u16>,
    /// Free-form user code field.
    pub user_code: Option<u32>,
    /// `0x88FFFF` was seen: this is a lead-in field.
    pub lead_in: bool,
    /// `0x80EEEE` was seen: this is a lead-out field.
    pub lead_out: bool,
    /// `0x82CFFF` was seen on line 16 or 17: picture-stop code.
    pub picture_stop: bool,
}

/// NTSC-only side-channel VBI data: line-10 FM code, white-flag, and IEC 61880 Video-ID.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NtscData {
    /// Whether line 10's FM code decoded and passed its parity/pattern checks.
    pub is_fm_code_data_valid: bool,
    /// The FM code's 20-bit payload, when valid.
    pub fm_code_data: Option<u32>,
    /// The FM code's field indicator bit, when valid.
    pub field_flag: bool,
    /// Whether the active picture area was mostly at or above the white/black midpoint.
    pub white_flag: bool,
    /// IEC 61880 Video-ID 14-bit message, when its CRC passed.
    pub video_id_data: Option<u16>,
}

/// 90-bit VITC (vertical-interval time code) payload, already CRC-validated.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitcData {
    /// The 8 raw data bytes, still BCD/flag-packed per SMPTE 12M.
    pub data: [u8; 8],
    /// Whether a line with a passing CRC was found for this field.
    pub in_use: bool,
}

/// CEA-608 (line 21) closed-caption data for one field.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedCaptionData {
    /// First 7-bit character (parity bit stripped), or `None` if its parity check failed.
    pub data0: Option<u8>,
    /// Second 7-bit character (parity bit stripped), or `None` if its parity check failed.
    pub data1: Option<u8>,
    /// Whether line 21 was present and at least one character decoded.
    pub in_use: bool,
}

/// Per-field parameters, VBI, dropout, and timecode metadata.
///
/// Updates to a field's metadata are made in place by the various decoder passes (VBI, NTSC,
/// dropout detection); each pass owns a disjoint subset of the fields below.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    /// 1-based sequence number of this field within the TBC file.
    pub seq_no: u32,
    /// Whether this is the first field of its frame.
    pub is_first_field: bool,
    /// Which of the 4 subcarrier-to-line-sync phase relationships this field holds, `1..=4`.
    pub field_phase_id: u8,
    /// Median burst amplitude, in 16-bit sample units.
    pub median_burst_ire: f64,
    /// Sync detector confidence, `0..=100`.
    pub sync_conf: u8,
    /// Number of audio samples associated with this field, when known.
    pub audio_samples: u32,
    /// Known-bad pixel runs detected for this field.
    pub drop_outs: Vec<Dropout>,
    /// Raw and decoded biphase VBI data.
    pub vbi: VbiData,
    /// Composite interpretation of `vbi`, once available.
    pub decoded_vbi: Option<DecodedVbi>,
    /// NTSC-only side channel: FM code, white flag, Video-ID.
    pub ntsc: Option<NtscData>,
    /// CEA-608 closed-caption payload.
    pub closed_caption: Option<ClosedCaptionData>,
    /// VITC timecode payload.
    pub vitc: Option<VitcData>,
    /// Whether this is a synthetic placeholder field inserted by the stacker to fill a gap.
    pub pad: bool,
    /// Byte offset of this field within the TBC file, recorded for padded fields so the emitter
    /// can place them correctly.
    pub disk_loc: Option<u64>,
}

impl FieldMetadata {
    /// Construct a minimal field record with everything except `seq_no`/`is_first_field` left at
    /// its default / absent state.
    pub fn new(seq_no: u32, is_first_field: bool) -> Self {
        FieldMetadata {
            seq_no,
            is_first_field,
            field_phase_id: 1,
            median_burst_ire: 0.0,
            sync_conf: 0,
            audio_samples: 0,
            drop_outs: Vec::new(),
            vbi: VbiData::default(),
            decoded_vbi: None,
            ntsc: None,
            closed_caption: None,
            vitc: None,
            pad: false,
            disk_loc: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;
    use serde_test::Token;

    use super::*;

    #[googletest::test]
    fn test_new_field_metadata_defaults() {
        let field = FieldMetadata::new(7, true);
        expect_that!(field.seq_no, eq(7));
        expect_that!(field.is_first_field, eq(true));
        expect_that!(field.drop_outs, empty());
        expect_that!(field.vbi.in_use, eq(false));
        expect_that!(field.pad, eq(false));
    }

    /// Pins the metadata JSON schema's field-name contract (§6 EXTERNAL INTERFACES): downstream
    /// tools parse this shape by field name, so a rename here is a breaking format change, not a
    /// refactor.
    #[googletest::test]
    fn test_dropout_json_field_names() {
        let dropout = Dropout { start_x: 2, end_x: 5, field_line: 1 };
        serde_test::assert_tokens(
            &dropout,
            &[
                Token::Struct { name: "Dropout", len: 3 },
                Token::Str("startX"),
                Token::U32(2),
                Token::Str("endX"),
                Token::U32(5),
                Token::Str("fieldLine"),
                Token::U32(1),
                Token::StructEnd,
            ],
        );
    }
}
