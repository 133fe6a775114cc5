use std::io::Cursor;

use googletest::prelude::*;

use super::*;
use crate::metadata::testutil::ntsc_video_parameters;

fn small_video_parameters() -> VideoParameters {
    let mut params = ntsc_video_parameters();
    params.field_width = 4;
    params.field_height = 2;
    params
}

fn field_bytes(first_sample: u16) -> Vec<u8> {
    (0..8u16)
        .map(|i| first_sample.wrapping_add(i))
        .flat_map(|sample| sample.to_le_bytes())
        .collect()
}

#[googletest::test]
fn test_read_field_by_seq_no() {
    let params = small_video_parameters();
    let mut bytes = field_bytes(0);
    bytes.extend(field_bytes(100));
    let mut reader = FieldReader::new(Cursor::new(bytes), &params);

    let field2 = reader.read_field(2).unwrap();
    expect_that!(field2, elements_are![eq(100), eq(101), eq(102), eq(103), eq(104), eq(105), eq(106), eq(107)]);

    // Random access: go back to field 1.
    let field1 = reader.read_field(1).unwrap();
    expect_that!(field1[0], eq(0));
}

#[googletest::test]
fn test_read_field_in_order() {
    let params = small_video_parameters();
    let mut bytes = field_bytes(0);
    bytes.extend(field_bytes(100));
    let mut reader = FieldReader::new(Cursor::new(bytes), &params);

    expect_that!(reader.read_field_in_order().unwrap()[0], eq(0));
    expect_that!(reader.read_field_in_order().unwrap()[0], eq(100));
}

#[googletest::test]
fn test_short_read_fails() {
    let params = small_video_parameters();
    let mut reader = FieldReader::new(Cursor::new(vec![0u8; 4]), &params);
    expect_that!(reader.read_field(1), err(anything()));
}

#[googletest::test]
fn test_write_field_round_trips() {
    let params = small_video_parameters();
    let mut output = Vec::new();
    {
        let mut writer = FieldWriter::new(&mut output, &params);
        writer.write_field(1, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        writer.flush().unwrap();
    }

    let mut reader = FieldReader::new(Cursor::new(output), &params);
    let field = reader.read_field(1).unwrap();
    expect_that!(field, elements_are![eq(0), eq(1), eq(2), eq(3), eq(4), eq(5), eq(6), eq(7)]);
}

#[googletest::test]
fn test_write_field_wrong_length_fails() {
    let params = small_video_parameters();
    let mut output = Vec::new();
    let mut writer = FieldWriter::new(&mut output, &params);
    expect_that!(writer.write_field(1, &[0, 1, 2]), err(anything()));
}
