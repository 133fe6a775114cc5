//! Frame-parallel scheduler: a bag-of-frames worker pool over an ordered input sequence, with
//! output re-ordered back into ascending frame-number order before it reaches the caller.
//!
//! Decoding one frame is independent of every other frame, but frames must still land on disk (or
//! in the metadata store) in order, and workers finish in whatever order the OS schedules them.
//! [`InputQueue`] and [`OutputSink`] are the two mutex-guarded shared structures that make that
//! work: one hands out frames to whichever worker asks next, the other collects results and
//! drains them strictly in order. [`run`] wires `num_workers` threads around both, with
//! [`AbortFlag`] as the out-of-band cancellation signal checked at every frame boundary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::metadata::FieldMetadata;

/// Shared cancellation flag, checked at frame boundaries by every worker.
///
/// A plain `AtomicBool` would work just as well, but wrapping it documents the one invariant
/// callers need: once [`AbortFlag::abort`] is called, every worker stops picking up new frames
/// "promptly" rather than immediately — a frame already in flight still runs to completion.
#[derive(Debug, Default)]
pub struct AbortFlag(AtomicBool);

impl AbortFlag {
    pub fn new() -> AbortFlag {
        AbortFlag(AtomicBool::new(false))
    }

    /// Request that all workers sharing this flag stop picking up new frames.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mutex-guarded cursor over an ordered, possibly-unbounded source of input frames.
///
/// `next` is the only thing allowed to touch the underlying reader, matching the rule that the
/// input file handle is read-only and any seeking is serialized through this one mutex.
pub struct InputQueue<I> {
    source: Mutex<Box<dyn FnMut() -> Option<(u64, I)> + Send>>,
}

impl<I> std::fmt::Debug for InputQueue<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputQueue").finish_non_exhaustive()
    }
}

impl<I> InputQueue<I> {
    /// Wrap a `(frame_no, payload)` generator — typically a closure over a [`crate::field_io`]
    /// pair of readers — as a queue workers can pull from concurrently.
    pub fn new(source: impl FnMut() -> Option<(u64, I)> + Send + 'static) -> InputQueue<I> {
        InputQueue { source: Mutex::new(Box::new(source)) }
    }

    /// Pull the next frame, or `None` at end of input. Blocks other callers only for the
    /// duration of one read, not for however long the caller then spends processing it.
    fn next(&self) -> Option<(u64, I)> {
        let mut source = self.source.lock().unwrap();
        source()
    }
}

struct OutputState<O> {
    next_frame_no: u64,
    pending: BTreeMap<u64, O>,
}

/// Mutex-guarded re-orderer: accepts completed frames in arrival order, emits them in frame-number
/// order.
///
/// Workers call [`OutputSink::deposit`] as soon as they finish a frame, regardless of which frame
/// finished first. Whichever deposit happens to make the next expected frame number available
/// drains the pending map — possibly several frames at once, if earlier ones were already
/// sitting there waiting on a slow straggler.
pub struct OutputSink<O> {
    state: Mutex<OutputState<O>>,
}

impl<O> std::fmt::Debug for OutputSink<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builder = f.debug_struct("OutputSink");
        match self.state.try_lock() {
            Ok(state) => builder
                .field("next_frame_no", &state.next_frame_no)
                .field("pending_count", &state.pending.len()),
            Err(_) => builder.field("state", &"<locked>"),
        };
        builder.finish()
    }
}

impl<O> OutputSink<O> {
    /// `first_frame_no` is the frame number input starts at (normally `0`, but a resumed decode
    /// may start partway through a capture).
    pub fn new(first_frame_no: u64) -> OutputSink<O> {
        OutputSink { state: Mutex::new(OutputState { next_frame_no: first_frame_no, pending: BTreeMap::new() }) }
    }

    /// Deposit one completed frame and drain everything now ready, calling `emit` once per frame
    /// in ascending order. `emit` runs under this sink's lock: concurrent depositors from other
    /// workers block until it returns, which is what keeps emission serialized without a
    /// dedicated emitter thread.
    pub fn deposit(&self, frame_no: u64, output: O, mut emit: impl FnMut(u64, O)) {
        let mut state = self.state.lock().unwrap();
        state.pending.insert(frame_no, output);
        while let Some(&next) = state.pending.keys().next() {
            if next != state.next_frame_no {
                break;
            }
            let ready = state.pending.remove(&next).unwrap();
            emit(next, ready);
            state.next_frame_no += 1;
        }
    }
}

/// Run `num_workers` worker threads pulling frames from `input`, transforming each with
/// `process`, and depositing the result into `output` for in-order emission via `emit`.
///
/// Returns once `input` is exhausted (or `abort` is set) and every in-flight frame has drained.
/// `num_workers` of `0` is treated as `1`.
pub fn run<I, O>(
    num_workers: usize,
    input: &InputQueue<I>,
    output: &OutputSink<O>,
    abort: &AbortFlag,
    process: impl Fn(u64, I) -> O + Sync,
    emit: impl Fn(u64, O) + Sync,
) where
    I: Send,
    O: Send,
{
    std::thread::scope(|scope| {
        for _ in 0..num_workers.max(1) {
            scope.spawn(|| loop {
                if abort.is_aborted() {
                    break;
                }
                let Some((frame_no, payload)) = input.next() else {
                    break;
                };
                if abort.is_aborted() {
                    break;
                }
                let result = process(frame_no, payload);
                output.deposit(frame_no, result, |n, o| emit(n, o));
            });
        }
    });
}

/// Fix up padded (placeholder) fields' metadata in place, in ascending index order.
///
/// A padded field is a gap-filler inserted so every source lines up on the same frame grid (see
/// [`crate::stack`]); it carries no real capture, so its `field_phase_id` and every other record
/// are extrapolated from the first non-padded field in the slice: the phase ID by continuing the
/// mod-4 alternation from the anchor's position, everything else by copying the anchor verbatim
/// (aside from `seq_no`, `pad`, and `disk_loc`, which stay field-specific).
///
/// Does nothing if every field in `fields` is padded (there is no anchor to extrapolate from).
pub fn fixup_padded_fields(fields: &mut [FieldMetadata]) {
    let Some(anchor_index) = fields.iter().position(|f| !f.pad) else {
        return;
    };
    let anchor = fields[anchor_index].clone();
    for (i, field) in fields.iter_mut().enumerate() {
        if !field.pad {
            continue;
        }
        let seq_no = field.seq_no;
        let pad = field.pad;
        let disk_loc = field.disk_loc;
        let offset = i as i64 - anchor_index as i64;
        let mut fixed = anchor.clone();
        fixed.seq_no = seq_no;
        fixed.pad = pad;
        fixed.disk_loc = disk_loc;
        fixed.field_phase_id = extrapolate_phase_id(anchor.field_phase_id, offset);
        *field = fixed;
    }
}

/// Continue the 1-based, mod-4 `field_phase_id` cycle `offset` fields away from `anchor_phase`.
fn extrapolate_phase_id(anchor_phase: u8, offset: i64) -> u8 {
    let zero_based = (anchor_phase as i64 - 1 + offset).rem_euclid(4);
    (zero_based + 1) as u8
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use googletest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[googletest::test]
    fn test_abort_flag_starts_clear() {
        let flag = AbortFlag::new();
        expect_false!(flag.is_aborted());
        flag.abort();
        expect_true!(flag.is_aborted());
    }

    #[googletest::test]
    fn test_output_sink_drains_in_order_even_when_deposited_out_of_order() {
        let sink = OutputSink::new(0);
        let emitted = StdMutex::new(Vec::new());

        sink.deposit(2, "c", |n, o| emitted.lock().unwrap().push((n, o)));
        expect_that!(*emitted.lock().unwrap(), container_eq(Vec::<(u64, &str)>::new()));

        sink.deposit(1, "b", |n, o| emitted.lock().unwrap().push((n, o)));
        expect_that!(*emitted.lock().unwrap(), container_eq(Vec::<(u64, &str)>::new()));

        sink.deposit(0, "a", |n, o| emitted.lock().unwrap().push((n, o)));
        expect_that!(*emitted.lock().unwrap(), container_eq(vec![(0, "a"), (1, "b"), (2, "c")]));
    }

    #[googletest::test]
    fn test_output_sink_starts_at_configured_first_frame_no() {
        let sink = OutputSink::new(5);
        let emitted = StdMutex::new(Vec::new());

        sink.deposit(5, "x", |n, o| emitted.lock().unwrap().push((n, o)));
        expect_that!(*emitted.lock().unwrap(), container_eq(vec![(5, "x")]));
    }

    #[googletest::test]
    fn test_input_queue_yields_frames_then_ends() {
        let mut remaining = vec![(0, 10), (1, 20)].into_iter();
        let queue = InputQueue::new(move || remaining.next());

        expect_that!(queue.next(), some(eq((0, 10))));
        expect_that!(queue.next(), some(eq((1, 20))));
        expect_that!(queue.next(), none());
    }

    #[googletest::test]
    fn test_run_emits_every_frame_exactly_once_in_order() {
        let frame_count = 50u64;
        let mut remaining = (0..frame_count).map(|n| (n, n * 10));
        let input = InputQueue::new(move || remaining.next());
        let output = OutputSink::new(0);
        let abort = AbortFlag::new();
        let emitted = StdMutex::new(Vec::new());

        run(
            4,
            &input,
            &output,
            &abort,
            // Reverse the frame order's relationship to processing cost: low frame numbers (which
            // must be emitted first) take longest, so emission order cannot come for free from
            // completion order.
            |frame_no, payload| {
                for _ in 0..(frame_count - frame_no) {
                    std::hint::spin_loop();
                }
                payload + 1
            },
            |n, o| emitted.lock().unwrap().push((n, o)),
        );

        let emitted = emitted.into_inner().unwrap();
        let expected: Vec<(u64, u64)> = (0..frame_count).map(|n| (n, n * 10 + 1)).collect();
        expect_that!(emitted, container_eq(expected));
    }

    #[googletest::test]
    fn test_run_stops_promptly_when_aborted_before_starting() {
        let mut remaining = (0..1000u64).map(|n| (n, n));
        let input = InputQueue::new(move || remaining.next());
        let output = OutputSink::new(0);
        let abort = AbortFlag::new();
        abort.abort();
        let emitted = StdMutex::new(Vec::new());

        run(4, &input, &output, &abort, |_, payload| payload, |n, o| emitted.lock().unwrap().push((n, o)));

        expect_that!(*emitted.lock().unwrap(), container_eq(Vec::<(u64, u64)>::new()));
    }

    fn make_field(seq_no: u32, phase_id: u8, pad: bool) -> FieldMetadata {
        let mut field = FieldMetadata::new(seq_no, true);
        field.field_phase_id = phase_id;
        field.pad = pad;
        field
    }

    #[googletest::test]
    fn test_fixup_padded_fields_extrapolates_phase_id_forward_and_backward() {
        let mut fields = vec![
            make_field(0, 0, true),
            make_field(1, 0, true),
            make_field(2, 3, false),
            make_field(3, 0, true),
            make_field(4, 0, true),
        ];

        fixup_padded_fields(&mut fields);

        expect_that!(fields[0].field_phase_id, eq(1));
        expect_that!(fields[1].field_phase_id, eq(2));
        expect_that!(fields[2].field_phase_id, eq(3));
        expect_that!(fields[3].field_phase_id, eq(4));
        expect_that!(fields[4].field_phase_id, eq(1));
    }

    #[googletest::test]
    fn test_fixup_padded_fields_copies_anchor_metadata_except_identity_fields() {
        let mut anchor = make_field(2, 3, false);
        anchor.median_burst_ire = 42.5;
        anchor.sync_conf = 7;
        let mut fields = vec![make_field(0, 0, true), anchor, make_field(4, 0, true)];

        fixup_padded_fields(&mut fields);

        expect_that!(fields[0].median_burst_ire, eq(42.5));
        expect_that!(fields[0].sync_conf, eq(7));
        expect_that!(fields[0].seq_no, eq(0));
        expect_true!(fields[0].pad);
        expect_that!(fields[2].median_burst_ire, eq(42.5));
        expect_that!(fields[2].seq_no, eq(4));
        expect_true!(fields[2].pad);
    }

    #[googletest::test]
    fn test_fixup_padded_fields_is_a_no_op_without_padding() {
        let mut fields = vec![make_field(0, 1, false), make_field(1, 2, false)];
        let before = fields.clone();

        fixup_padded_fields(&mut fields);

        expect_that!(fields, container_eq(before));
    }

    #[googletest::test]
    fn test_fixup_padded_fields_is_a_no_op_when_everything_is_padded() {
        let mut fields = vec![make_field(0, 0, true), make_field(1, 0, true)];
        let before = fields.clone();

        fixup_padded_fields(&mut fields);

        expect_that!(fields, container_eq(before));
    }

    #[rstest]
    #[case(1, 0, 1)]
    #[case(1, 1, 2)]
    #[case(1, 3, 4)]
    #[case(1, 4, 1)]
    #[case(4, -1, 3)]
    #[case(1, -1, 4)]
    fn test_extrapolate_phase_id_wraps_mod_4(#[case] anchor: u8, #[case] offset: i64, #[case] expected: u8) {
        assert_eq!(extrapolate_phase_id(anchor, offset), expected);
    }
}
