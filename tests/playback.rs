use colorseq::midi::{NoteMessage, NoteOffQueue};
use colorseq::{
    AudioBackend, AudioError, Renderer, Sequencer, SequencerConfig, SequencerError, StartOutcome,
    TriggerCall, VoiceKind,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const STEP: Duration = Duration::from_millis(600);

#[derive(Default)]
struct Log {
    batches: Vec<(Instant, Vec<TriggerCall>)>,
    columns: Vec<Option<usize>>,
}

struct BatchAudio(Arc<Mutex<Log>>);

impl AudioBackend for BatchAudio {
    fn trigger(&mut self, call: &TriggerCall) -> Result<(), AudioError> {
        let mut log = self.0.lock();
        match log.batches.last_mut() {
            Some((start, calls)) if *start == call.start() => calls.push(call.clone()),
            _ => log.batches.push((call.start(), vec![call.clone()])),
        }
        Ok(())
    }
}

struct ColumnLog(Arc<Mutex<Log>>);

impl Renderer for ColumnLog {
    fn grid_changed(&mut self) {}

    fn column_changed(&mut self, column: Option<usize>) {
        self.0.lock().columns.push(column);
    }
}

fn sequencer() -> (Sequencer, Arc<Mutex<Log>>) {
    let log = Arc::new(Mutex::new(Log::default()));
    let sequencer = Sequencer::new(
        &SequencerConfig::canonical(),
        Box::new(BatchAudio(Arc::clone(&log))),
        Box::new(ColumnLog(Arc::clone(&log))),
    )
    .unwrap();
    (sequencer, log)
}

fn highlighted(log: &Log) -> Vec<usize> {
    log.columns.iter().filter_map(|c| *c).collect()
}

#[test]
fn red_cell_plays_middle_c_then_wraps() {
    let (mut seq, log) = sequencer();
    seq.select_color("Red").unwrap();
    seq.apply_tool(0, 0).unwrap();

    let t0 = Instant::now();
    assert_eq!(seq.start(t0), StartOutcome::Started);

    seq.poll(t0);
    {
        let log = log.lock();
        assert_eq!(log.batches.len(), 1);
        let (at, calls) = &log.batches[0];
        assert_eq!(*at, t0);
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            TriggerCall::Tone {
                voice,
                frequency_hz,
                ..
            } => {
                assert_eq!(*voice, VoiceKind::Lead);
                assert!((frequency_hz - 261.63).abs() < 0.01);
            }
            other => panic!("expected a tone, got {:?}", other),
        }
    }

    // column 1 is unpainted: it advances without triggering
    seq.poll(t0 + STEP);
    assert_eq!(seq.current_column(), Some(1));
    assert_eq!(log.lock().batches.len(), 1);

    seq.poll(t0 + Duration::from_millis(4799));
    assert_eq!(seq.current_column(), Some(7));

    seq.poll(t0 + Duration::from_millis(4800));
    assert_eq!(seq.current_column(), Some(0));
    let log = log.lock();
    assert_eq!(log.batches.len(), 2);
    assert_eq!(log.batches[1].0, t0 + Duration::from_millis(4800));
}

#[test]
fn current_column_is_fired_steps_mod_cols() {
    let (mut seq, _) = sequencer();
    let t0 = Instant::now();
    seq.start(t0);

    let mut fired = 0u32;
    for k in 0..30u32 {
        fired += seq.poll(t0 + STEP * k) as u32;
        assert_eq!(fired, k + 1);
        assert_eq!(seq.current_column(), Some((fired as usize - 1) % 8));
    }
}

#[test]
fn stop_between_steps_prevents_next_step() {
    let (mut seq, log) = sequencer();
    for col in 0..8 {
        seq.apply_tool(0, col).unwrap();
    }

    let t0 = Instant::now();
    seq.start(t0);
    for k in 0..3u32 {
        seq.poll(t0 + STEP * k);
    }
    let dispatched = log.lock().batches.len();
    assert_eq!(dispatched, 3);

    seq.stop();
    seq.poll(t0 + STEP * 3);
    seq.poll(t0 + STEP * 50);
    assert_eq!(log.lock().batches.len(), dispatched);
    assert_eq!(log.lock().columns.last(), Some(&None));
    assert_eq!(seq.next_deadline(), None);
}

#[test]
fn double_start_does_not_double_speed() {
    let (mut seq, log) = sequencer();
    for col in 0..8 {
        seq.apply_tool(0, col).unwrap();
    }

    let t0 = Instant::now();
    seq.start(t0);
    assert_eq!(seq.start(t0), StartOutcome::AlreadyRunning);
    for k in 0..4u32 {
        seq.poll(t0 + STEP * k);
    }

    let log = log.lock();
    assert_eq!(log.batches.len(), 4);
    assert_eq!(highlighted(&log), vec![0, 1, 2, 3]);
}

#[test]
fn late_poll_keeps_absolute_step_times() {
    let (mut seq, log) = sequencer();
    for col in 0..8 {
        seq.apply_tool(1, col).unwrap();
    }

    let t0 = Instant::now();
    seq.start(t0);
    // a slow host wakes 250ms late for every step
    for k in 0..6u32 {
        seq.poll(t0 + STEP * k + Duration::from_millis(250));
    }

    let log = log.lock();
    let starts: Vec<Instant> = log.batches.iter().map(|(at, _)| *at).collect();
    let expected: Vec<Instant> = (0..6u32).map(|k| t0 + STEP * k).collect();
    assert_eq!(starts, expected);
}

#[test]
fn percussion_color_rejected_on_lead_row() {
    let (mut seq, _) = sequencer();
    seq.select_color("Red").unwrap();
    seq.apply_tool(0, 4).unwrap();
    let before: Vec<_> = (0..8).map(|c| seq.grid().column_snapshot(c).unwrap()).collect();

    seq.select_color("Black").unwrap();
    assert_eq!(
        seq.apply_tool(0, 4),
        Err(SequencerError::PaletteMismatch {
            key: "Black".into(),
            row: 0
        })
    );

    let after: Vec<_> = (0..8).map(|c| seq.grid().column_snapshot(c).unwrap()).collect();
    assert_eq!(before, after);
}

#[test]
fn column_batch_is_in_row_order() {
    let (mut seq, log) = sequencer();
    seq.select_color("White").unwrap();
    seq.apply_tool(2, 0).unwrap();
    seq.select_color("Green").unwrap();
    seq.apply_tool(1, 0).unwrap();
    seq.apply_tool(0, 0).unwrap();

    let t0 = Instant::now();
    seq.start(t0);
    seq.poll(t0);

    let log = log.lock();
    let voices: Vec<VoiceKind> = log.batches[0].1.iter().map(TriggerCall::voice).collect();
    assert_eq!(
        voices,
        vec![VoiceKind::Lead, VoiceKind::Bass, VoiceKind::Percussion]
    );
}

#[test]
fn clear_leaves_every_column_empty() {
    let (mut seq, log) = sequencer();
    for col in 0..8 {
        seq.apply_tool(col % 2, col).unwrap();
    }
    seq.clear();
    for col in 0..8 {
        assert!(seq.grid().column_snapshot(col).unwrap().is_empty());
    }

    let t0 = Instant::now();
    seq.start(t0);
    seq.poll(t0 + STEP * 7);
    assert!(log.lock().batches.is_empty());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wire {
    On(u8, u8),
    Off(u8, u8),
}

/// Records note messages the way the MIDI backend sends them.
struct WireAudio {
    wire: Arc<Mutex<Vec<Wire>>>,
    note_offs: NoteOffQueue,
}

impl WireAudio {
    fn flush(&mut self, notes: Vec<(u8, u8)>) {
        let mut wire = self.wire.lock();
        wire.extend(notes.into_iter().map(|(channel, note)| Wire::Off(channel, note)));
    }
}

impl AudioBackend for WireAudio {
    fn trigger(&mut self, call: &TriggerCall) -> Result<(), AudioError> {
        let message = NoteMessage::for_trigger(call)?;
        self.wire.lock().push(Wire::On(message.channel, message.note));
        self.note_offs
            .push(call.start() + message.gate, message.channel, message.note);
        Ok(())
    }

    fn release_due(&mut self, now: Instant) {
        let due = self.note_offs.take_due(now);
        self.flush(due);
    }

    fn release_all(&mut self) {
        let held = self.note_offs.take_all();
        self.flush(held);
    }
}

#[test]
fn repeated_note_is_released_before_it_retriggers() {
    let wire = Arc::new(Mutex::new(Vec::new()));
    let mut seq = Sequencer::new(
        &SequencerConfig::canonical(),
        Box::new(WireAudio {
            wire: Arc::clone(&wire),
            note_offs: NoteOffQueue::default(),
        }),
        Box::new(colorseq::NullRenderer),
    )
    .unwrap();
    seq.select_color("Red").unwrap();
    seq.apply_tool(0, 0).unwrap();
    seq.apply_tool(0, 1).unwrap();

    let t0 = Instant::now();
    seq.start(t0);
    seq.poll(t0);
    seq.poll(t0 + STEP);

    assert_eq!(
        *wire.lock(),
        vec![Wire::On(0, 60), Wire::Off(0, 60), Wire::On(0, 60)]
    );

    seq.stop();
    assert_eq!(wire.lock().last(), Some(&Wire::Off(0, 60)));
}
