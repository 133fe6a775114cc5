//! Multi-source stacking: pixel-wise combination of N aligned TBC sources, keyed by VBI frame
//! number, with differential dropout detection and a choice of combination heuristics.
//!
//! This recovers a single enhanced capture from several independent passes of the same disc,
//! each of which may have a different (mostly disjoint) set of dropouts: where one source's
//! optics missed a pixel, another's usually didn't.

use crate::metadata::Dropout;

/// A source's run of valid VBI frame numbers, and the sequential-frame mapping derived from it.
///
/// Per §4.I: source `s` maps VBI frame `v` to its own sequential frame number via
/// `v - min + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbiFrameRange {
    /// Lowest VBI frame number this source covers.
    pub min: u32,
    /// Highest VBI frame number this source covers.
    pub max: u32,
}

impl VbiFrameRange {
    /// Whether `vbi_frame` falls within `[min, max]`.
    pub fn contains(&self, vbi_frame: u32) -> bool {
        vbi_frame >= self.min && vbi_frame <= self.max
    }

    /// This source's own 1-based sequential frame number for `vbi_frame`, or `None` if out of
    /// range.
    pub fn sequential_frame_number(&self, vbi_frame: u32) -> Option<u32> {
        self.contains(vbi_frame).then(|| vbi_frame - self.min + 1)
    }
}

/// Whether a source contributes a usable frame at `vbi_frame`: in range, and not a synthetic
/// placeholder the source itself padded in for a gap.
pub fn is_available(range: &VbiFrameRange, vbi_frame: u32, is_pad: bool) -> bool {
    range.contains(vbi_frame) && !is_pad
}

/// How surviving per-pixel source values are combined into one output value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    /// Arithmetic mean of all survivors.
    Mean,
    /// Median of all survivors.
    Median,
    /// Mean restricted to survivors within `smart_threshold` of the local median.
    SmartMean,
    /// Bias the median-threshold mean toward whichever survivor is closest to the spatially
    /// adjacent (north/south/east/west) pixels' own combined values.
    SmartNeighbor,
    /// Pick the survivor closest to the spatially adjacent pixels' combined values, then blend it
    /// toward the local median.
    Neighbor,
}

/// Tunable parameters for one stacking run, mirroring the stacker CLI's `-m`/`--st`/
/// `--no-diffdod`/`--passthrough` flags (§6).
#[derive(Debug, Clone, Copy)]
pub struct StackerConfig {
    /// Which [`CombineMode`] to use for surviving values.
    pub mode: CombineMode,
    /// Threshold, in 16-bit sample units, used by [`CombineMode::SmartMean`],
    /// [`CombineMode::SmartNeighbor`], and [`CombineMode::Neighbor`].
    pub smart_threshold: f64,
    /// Disable differential dropout recovery.
    pub no_diff_dod: bool,
    /// Always flag a pixel as a dropout in the output if every source originally flagged it,
    /// even when differential DOD recovered a value.
    pub pass_through: bool,
    /// One past the last column of the color burst; differential DOD and dropout metadata are
    /// never generated at or before this column (sync/burst pixels aren't picture content).
    pub colour_burst_start: usize,
}

/// One source's field worth of samples and per-pixel dropout flags, both `width * height` long,
/// row-major.
#[derive(Debug, Clone)]
pub struct SourceFieldPair {
    /// Samples per row.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Raw 16-bit samples.
    pub samples: Vec<u16>,
    /// Per-pixel "this sample is known-bad" flags, parallel to `samples`.
    pub dropout: Vec<bool>,
}

/// Output of [`combine_field`]: a recovered field plus recomputed dropout runs.
#[derive(Debug, Clone)]
pub struct CombinedField {
    /// Samples per row.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Combined 16-bit samples.
    pub samples: Vec<u16>,
    /// Recomputed dropout runs for the combined field.
    pub dropouts: Vec<Dropout>,
}

/// Combine `sources` (all with matching geometry, already filtered down to those
/// [`is_available`] for this frame) into one [`CombinedField`].
///
/// `sources` must be non-empty and have identical, consistent `width`/`height`/buffer lengths;
/// violating that is a caller programming error (analogous to [`crate::field_io`]'s fixed-stride
/// contract), not a per-call failure mode.
pub fn combine_field(sources: &[SourceFieldPair], config: &StackerConfig) -> CombinedField {
    assert!(!sources.is_empty(), "combine_field requires at least one source");
    let width = sources[0].width;
    let height = sources[0].height;
    for s in sources {
        assert_eq!(s.width, width);
        assert_eq!(s.height, height);
        assert_eq!(s.samples.len(), width * height);
        assert_eq!(s.dropout.len(), width * height);
    }

    let mut out_samples = vec![0u16; width * height];
    let mut out_flags = vec![false; width * height];

    for y in 0..height {
        let mut last_good = f64::from(sources[0].samples[y * width]);
        for x in 0..width {
            let idx = y * width + x;
            let survivors: Vec<f64> = sources
                .iter()
                .filter(|s| !s.dropout[idx])
                .map(|s| f64::from(s.samples[idx]))
                .collect();
            let originally_all_dropout = sources.iter().all(|s| s.dropout[idx]);

            let mut effective = survivors;
            if effective.is_empty()
                && !config.no_diff_dod
                && sources.len() >= 3
                && x > config.colour_burst_start
            {
                let all_values: Vec<f64> =
                    sources.iter().map(|s| f64::from(s.samples[idx])).collect();
                effective = differential_dod(&all_values);
            }

            if effective.is_empty() {
                out_samples[idx] = last_good.round().clamp(0.0, f64::from(u16::MAX)) as u16;
                if x > config.colour_burst_start {
                    out_flags[idx] = true;
                }
            } else {
                let combined = combine(sources, x, y, &effective, config);
                out_samples[idx] = combined.round().clamp(0.0, f64::from(u16::MAX)) as u16;
                last_good = combined;
                if config.pass_through && originally_all_dropout && x > config.colour_burst_start {
                    out_flags[idx] = true;
                }
            }
        }
    }

    let dropouts = coalesce_dropouts(&out_flags, width, height);
    CombinedField { width, height, samples: out_samples, dropouts }
}

/// Differential dropout recovery (§4.I): keep only values within 10% of the cross-source median,
/// recovering pixels every source independently (and wrongly) flagged as dropout.
fn differential_dod(values: &[f64]) -> Vec<f64> {
    let m = median(values);
    let band = m.abs() * 0.10;
    values.iter().copied().filter(|&v| (v - m).abs() <= band).collect()
}

fn combine(sources: &[SourceFieldPair], x: usize, y: usize, values: &[f64], config: &StackerConfig) -> f64 {
    match config.mode {
        CombineMode::Mean => mean(values),
        CombineMode::Median => median(values),
        CombineMode::SmartMean => smart_mean(values, config.smart_threshold),
        CombineMode::SmartNeighbor | CombineMode::Neighbor => {
            let width = sources[0].width as isize;
            let height = sources[0].height as isize;
            let (x, y) = (x as isize, y as isize);
            let north = gather_neighbor(sources, x, y - 1, width, height, config);
            let south = gather_neighbor(sources, x, y + 1, width, height, config);
            let east = gather_neighbor(sources, x + 1, y, width, height, config);
            let west = gather_neighbor(sources, x - 1, y, width, height, config);
            if config.mode == CombineMode::SmartNeighbor {
                smart_neighbor(values, &north, &south, &east, &west, config.smart_threshold)
            } else {
                neighbor(values, &north, &south, &east, &west)
            }
        }
    }
}

/// Values at one spatially adjacent pixel (same sources, one row/column over), filtered the same
/// way as the primary pixel's survivor set, plus whether every source was a dropout there.
/// Out-of-frame neighbors (the edges of the field) contribute nothing.
fn gather_neighbor(
    sources: &[SourceFieldPair],
    x: isize,
    y: isize,
    width: isize,
    height: isize,
    config: &StackerConfig,
) -> (Vec<f64>, bool) {
    if x < 0 || x >= width || y < 0 || y >= height {
        return (Vec::new(), true);
    }
    let idx = (y as usize) * (width as usize) + (x as usize);
    let mut values = Vec::new();
    let mut all_dropout = true;
    for s in sources {
        if !s.dropout[idx] {
            values.push(f64::from(s.samples[idx]));
            all_dropout = false;
        } else if s.samples[idx] > 0 && !config.no_diff_dod {
            values.push(f64::from(s.samples[idx]));
        }
    }
    if all_dropout && sources.len() >= 3 && !config.no_diff_dod && x > config.colour_burst_start as isize {
        values = differential_dod(&values);
    }
    (values, all_dropout)
}

/// A neighbor pixel's representative value, per `stacker.cpp`'s `stackMode` cases 3/4: the median
/// of its sources when every one of them was a dropout recovery, otherwise just the first source's
/// value; `None` when the neighbor contributed nothing at all.
fn neighbor_value((values, all_dropout): &(Vec<f64>, bool)) -> Option<f64> {
    if values.len() > 1 && *all_dropout {
        Some(median(values))
    } else {
        values.first().copied()
    }
}

/// The element of `values` closest to `target`.
fn closest(values: &[f64], target: f64) -> f64 {
    values
        .iter()
        .copied()
        .min_by(|a, b| (a - target).abs().partial_cmp(&(b - target).abs()).unwrap())
        .unwrap()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Mean of values within `threshold` of the local median.
fn smart_mean(values: &[f64], threshold: f64) -> f64 {
    let m = median(values);
    let kept: Vec<f64> = values.iter().copied().filter(|&v| (v - m).abs() < threshold).collect();
    if kept.is_empty() {
        m
    } else {
        mean(&kept)
    }
}

/// Smart-neighbor combination (`stacker.cpp`'s `stackMode` case 3): pick, out of this pixel's
/// survivors, whichever is closest to each available spatial neighbor's representative value;
/// of those candidates, keep the one closest to the local median. With 3+ survivors, that pick
/// then re-biases a mean-within-threshold pass (mirroring [`smart_mean`], but centered on the
/// neighbor-biased pick instead of the plain median); with exactly 2, it's used directly.
fn smart_neighbor(
    values: &[f64],
    north: &(Vec<f64>, bool),
    south: &(Vec<f64>, bool),
    east: &(Vec<f64>, bool),
    west: &(Vec<f64>, bool),
    threshold: f64,
) -> f64 {
    let m = median(values);
    let neighbor_values: Vec<f64> =
        [north, south, east, west].into_iter().filter_map(neighbor_value).collect();

    let result_neighbor = if neighbor_values.is_empty() {
        m
    } else {
        let closest_per_neighbor: Vec<f64> =
            neighbor_values.iter().map(|&n| closest(values, n)).collect();
        closest(&closest_per_neighbor, m)
    };

    if values.len() > 2 {
        let kept: Vec<f64> =
            values.iter().copied().filter(|&v| (v - result_neighbor).abs() < threshold).collect();
        if kept.is_empty() { result_neighbor } else { mean(&kept) }
    } else {
        result_neighbor
    }
}

/// Neighbor combination (`stacker.cpp`'s `stackMode` case 4): as [`smart_neighbor`], pick the
/// survivor closest to the spatial neighbors' representative values, biased toward the local
/// median; with 3+ survivors, average that pick with the median instead of re-filtering by a
/// threshold.
fn neighbor(
    values: &[f64],
    north: &(Vec<f64>, bool),
    south: &(Vec<f64>, bool),
    east: &(Vec<f64>, bool),
    west: &(Vec<f64>, bool),
) -> f64 {
    let m = median(values);
    let neighbor_values: Vec<f64> =
        [north, south, east, west].into_iter().filter_map(neighbor_value).collect();

    if neighbor_values.is_empty() {
        return m;
    }
    let closest_per_neighbor: Vec<f64> =
        neighbor_values.iter().map(|&n| closest(values, n)).collect();
    let result = closest(&closest_per_neighbor, m);

    if values.len() > 2 { (m + result) / 2.0 } else { result }
}

/// Coalesce adjacent same-line dropout columns into runs; a run touching `width` closes there.
pub fn coalesce_dropouts(flags: &[bool], width: usize, height: usize) -> Vec<Dropout> {
    let mut result = Vec::new();
    for y in 0..height {
        let mut run_start: Option<usize> = None;
        for x in 0..width {
            let idx = y * width + x;
            if flags[idx] {
                run_start.get_or_insert(x);
            } else if let Some(start) = run_start.take() {
                result.push(Dropout { start_x: start as u32, end_x: x as u32, field_line: (y + 1) as u32 });
            }
        }
        if let Some(start) = run_start {
            result.push(Dropout { start_x: start as u32, end_x: width as u32, field_line: (y + 1) as u32 });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn config(mode: CombineMode) -> StackerConfig {
        StackerConfig {
            mode,
            smart_threshold: 15.0,
            no_diff_dod: false,
            pass_through: false,
            colour_burst_start: 10,
        }
    }

    fn source(samples: Vec<u16>, dropout: Vec<bool>) -> SourceFieldPair {
        let width = samples.len();
        SourceFieldPair { width, height: 1, samples, dropout }
    }

    #[googletest::test]
    fn test_vbi_frame_range_sequential_mapping() {
        let range = VbiFrameRange { min: 100, max: 200 };
        expect_that!(range.sequential_frame_number(100), some(eq(1)));
        expect_that!(range.sequential_frame_number(105), some(eq(6)));
        expect_that!(range.sequential_frame_number(99), none());
        expect_that!(range.sequential_frame_number(201), none());
    }

    #[googletest::test]
    fn test_is_available_excludes_padded_frames() {
        let range = VbiFrameRange { min: 1, max: 10 };
        expect_that!(is_available(&range, 5, false), eq(true));
        expect_that!(is_available(&range, 5, true), eq(false));
        expect_that!(is_available(&range, 50, false), eq(false));
    }

    #[googletest::test]
    fn test_differential_dod_recovers_scenario_from_spec() {
        // 3 sources, all flagging dropout, values [100, 102, 5000]: median 102, band +-10.2,
        // surviving set {100, 102}.
        let recovered = differential_dod(&[100.0, 102.0, 5000.0]);
        expect_that!(recovered, unordered_elements_are![eq(100.0), eq(102.0)]);
    }

    #[googletest::test]
    fn test_combine_field_differential_dod_not_reflagged() {
        let width = 20;
        let col = 15usize;
        let mut mk = |value: u16| {
            let mut samples = vec![1000u16; width];
            let mut dropout = vec![false; width];
            samples[col] = value;
            dropout[col] = true;
            source(samples, dropout)
        };
        let sources = vec![mk(100), mk(102), mk(5000)];
        let result = combine_field(&sources, &config(CombineMode::Mean));
        expect_that!(result.samples[col], eq(101));
        expect_false!(result.dropouts.iter().any(|d| d.start_x <= col as u32 && col as u32 <= d.end_x));
    }

    #[googletest::test]
    fn test_combine_field_no_survivors_flags_dropout_and_holds_last_good() {
        let width = 20;
        let col = 15usize;
        let mut mk = |value: u16, dropped: bool| {
            let mut samples = vec![1000u16; width];
            let mut dropout = vec![false; width];
            samples[col] = value;
            dropout[col] = dropped;
            source(samples, dropout)
        };
        let sources = vec![mk(100, true), mk(102, true)];
        let result = combine_field(&sources, &config(CombineMode::Mean));
        expect_that!(result.samples[col], eq(1000));
        expect_true!(result.dropouts.iter().any(|d| d.start_x == col as u32 && d.end_x == (col + 1) as u32));
    }

    #[googletest::test]
    fn test_combine_field_idempotent_for_identical_sources() {
        let width = 30;
        let samples = vec![1234u16; width];
        let dropout = vec![false; width];
        let sources = vec![
            source(samples.clone(), dropout.clone()),
            source(samples.clone(), dropout.clone()),
            source(samples.clone(), dropout.clone()),
        ];
        let result = combine_field(&sources, &config(CombineMode::Mean));
        expect_that!(result.samples, container_eq(samples));
        expect_that!(result.dropouts, empty());
    }

    #[rstest]
    #[case(CombineMode::Mean)]
    #[case(CombineMode::Median)]
    #[case(CombineMode::SmartMean)]
    #[case(CombineMode::SmartNeighbor)]
    #[case(CombineMode::Neighbor)]
    fn test_combine_modes_agree_on_uniform_field(#[case] mode: CombineMode) {
        let width = 20;
        let samples = vec![500u16; width * 3];
        let dropout = vec![false; width * 3];
        let mk = || SourceFieldPair { width, height: 3, samples: samples.clone(), dropout: dropout.clone() };
        let sources = vec![mk(), mk(), mk()];
        let result = combine_field(&sources, &config(mode));
        expect_that!(result.samples, container_eq(samples));
    }

    #[googletest::test]
    fn test_neighbor_modes_bias_toward_spatial_neighbor() {
        // Column `col` on the middle row disagrees between two sources (100 vs 900); every
        // spatially adjacent pixel (same column, rows above/below, and both horizontal
        // neighbors) agrees on 100, so neighbor-aware modes should prefer it over the plain
        // mean/median's midpoint.
        let width = 5;
        let col = 2usize;
        let samples_a = vec![100u16; width * 3];
        let mut samples_b = vec![100u16; width * 3];
        samples_b[width + col] = 900;
        let dropout = vec![false; width * 3];
        let sources = vec![
            source_2d(samples_a, dropout.clone(), width),
            source_2d(samples_b, dropout, width),
        ];
        let smart = combine_field(&sources, &config(CombineMode::SmartNeighbor));
        let plain = combine_field(&sources, &config(CombineMode::Mean));
        expect_that!(smart.samples[width + col], eq(100));
        expect_that!(plain.samples[width + col], eq(500));
    }

    fn source_2d(samples: Vec<u16>, dropout: Vec<bool>, width: usize) -> SourceFieldPair {
        let height = samples.len() / width;
        SourceFieldPair { width, height, samples, dropout }
    }

    #[googletest::test]
    fn test_coalesce_dropouts_closes_run_at_width() {
        let width = 5;
        let flags = vec![false, false, true, true, true];
        let dropouts = coalesce_dropouts(&flags, width, 1);
        expect_that!(
            dropouts,
            elements_are![eq(Dropout { start_x: 2, end_x: 5, field_line: 1 })]
        );
    }

    #[googletest::test]
    fn test_coalesce_dropouts_handles_interior_run() {
        let width = 6;
        let flags = vec![false, true, true, false, false, false];
        let dropouts = coalesce_dropouts(&flags, width, 1);
        expect_that!(
            dropouts,
            elements_are![eq(Dropout { start_x: 1, end_x: 3, field_line: 1 })]
        );
    }
}
