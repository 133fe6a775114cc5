use garde::{Unvalidated, Valid, Validate};
use serde::{Deserialize, Serialize};

/// Widest field we will ever validate.  Chosen generously above any real capture geometry so
/// that the bound catches corrupt metadata rather than legitimate high-resolution captures.
pub const MAX_WIDTH: u32 = 4096;

/// Tallest field we will ever validate, mirrored from [`MAX_WIDTH`] for the same reason.
pub const MAX_HEIGHT: u32 = 2400;

/// The two analog video systems this crate understands.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum System {
    /// 625-line, 50 field/s system, color subcarrier ~4.43 MHz.
    Pal,
    /// 525-line, 60 field/s system, color subcarrier ~3.58 MHz.
    Ntsc,
}

/// Immutable per-capture record describing the geometry and color encoding of a TBC source.
///
/// Two fields interleave to a frame of `2 * field_height - 1` lines (the fields share one
/// "middle" half-line).  All sample-column indices are relative to the start of a field line, not
/// the start of active video.
#[derive(Debug, PartialEq, Clone, Copy, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoParameters {
    /// Which analog video system this capture uses.
    #[garde(skip)]
    pub system: System,

    /// Color subcarrier frequency, in Hz.
    #[garde(custom(is_positive))]
    pub f_sc: f64,

    /// Sample rate of the capture, in Hz.  Either subcarrier-locked (`4 * f_sc`) or line-locked.
    #[garde(custom(is_positive))]
    pub sample_rate: f64,

    /// Number of samples per field line.
    #[garde(range(min = 1, max = MAX_WIDTH))]
    pub field_width: u32,

    /// Number of lines per field.
    #[garde(custom(check_field_height))]
    pub field_height: u32,

    /// First sample column of the active picture.
    #[garde(custom(check_active_video_start))]
    pub active_video_start: u32,

    /// One past the last sample column of the active picture.
    #[garde(custom(check_active_video_end(&self)))]
    pub active_video_end: u32,

    /// First line (in frame numbering) that carries active picture content.
    #[garde(skip)]
    pub first_active_frame_line: u32,

    /// Last line (in frame numbering) that carries active picture content.
    #[garde(skip)]
    pub last_active_frame_line: u32,

    /// First sample column of the color burst.
    #[garde(skip)]
    pub colour_burst_start: u32,

    /// One past the last sample column of the color burst.
    #[garde(skip)]
    pub colour_burst_end: u32,

    /// 16-bit sample value corresponding to 0 IRE (black).
    #[garde(skip)]
    pub black16b_ire: u16,

    /// 16-bit sample value corresponding to 100 IRE (white).
    #[garde(custom(check_white_above_black(&self)))]
    pub white16b_ire: u16,

    /// Whether `sample_rate` is an exact multiple of the color subcarrier.
    ///
    /// The chroma decoder requires this; see [`check_subcarrier_lock`].
    #[garde(custom(check_subcarrier_lock(&self)))]
    pub is_subcarrier_locked: bool,

    /// Whether VBI frame numbers have been cross-referenced against another source already.
    #[garde(skip)]
    pub is_mapped: bool,
}

fn is_positive(value: &f64, _ctx: &()) -> garde::Result {
    if *value > 0.0 {
        Ok(())
    } else {
        Err(garde::Error::new("value must be positive"))
    }
}

fn check_field_height(value: &u32, _ctx: &()) -> garde::Result {
    if *value == 0 {
        return Err(garde::Error::new("field_height must not be zero"));
    }
    if 2 * value - 1 > MAX_HEIGHT {
        return Err(garde::Error::new(format!(
            "field_height of {value} implies a frame height over the maximum of {MAX_HEIGHT} lines"
        )));
    }
    Ok(())
}

fn check_active_video_start(value: &u32, _ctx: &()) -> garde::Result {
    if *value < 16 {
        return Err(garde::Error::new(format!(
            "active_video_start of {value} is less than the minimum of 16 samples"
        )));
    }
    Ok(())
}

fn check_active_video_end(video_params: &VideoParameters) -> impl FnOnce(&u32, &()) -> garde::Result + '_ {
    move |value, _ctx| {
        if *value <= video_params.active_video_start {
            return Err(garde::Error::new(
                "active_video_end must be greater than active_video_start",
            ));
        }
        if *value > video_params.field_width {
            return Err(garde::Error::new("active_video_end must not exceed field_width"));
        }
        Ok(())
    }
}

fn check_white_above_black(
    video_params: &VideoParameters,
) -> impl FnOnce(&u16, &()) -> garde::Result + '_ {
    move |white, _ctx| {
        if *white <= video_params.black16b_ire {
            return Err(garde::Error::new("white16b_ire must be greater than black16b_ire"));
        }
        Ok(())
    }
}

/// The chroma decoder's 4fSC sin/cos table assumes the sample clock is locked to exactly four
/// times the color subcarrier.  A capture can still be decoded without that lock (line-locked
/// sampling), but the 1D/2D/3D comb stages are only meaningful when it holds, so we reject a
/// mismatch whenever `is_subcarrier_locked` claims otherwise.
fn check_subcarrier_lock(
    video_params: &VideoParameters,
) -> impl FnOnce(&bool, &()) -> garde::Result + '_ {
    move |is_locked, _ctx| {
        if !*is_locked {
            return Ok(());
        }
        let ratio = video_params.sample_rate / video_params.f_sc;
        if (ratio - 4.0).abs() >= 1e-6 {
            return Err(garde::Error::new(format!(
                "is_subcarrier_locked is set, but sample_rate / f_sc = {ratio} is not within \
                1e-6 of 4"
            )));
        }
        Ok(())
    }
}

/// Validated [`VideoParameters`].  Construct via [`garde::Unvalidated::validate`].
pub type ValidVideoParameters = Valid<VideoParameters>;

impl VideoParameters {
    /// Validate this record, producing a [`ValidVideoParameters`] or the first validation
    /// failure encountered.
    pub fn validated(self) -> Result<ValidVideoParameters, garde::Report> {
        Unvalidated::new(self).validate()
    }

    /// `irescale` converts a difference of 16-bit sample levels into IRE-percent, per the
    /// `(white - black) / 100` definition used throughout the chroma decoder.
    pub fn irescale(&self) -> f64 {
        (f64::from(self.white16b_ire) - f64::from(self.black16b_ire)) / 100.0
    }
}
