//! Note-on / note-off scheduling for generated notes.
//!
//! Each generated note-on is emitted at the start of the current block and
//! arms a deadline `now + hold` for its note number. At the start of every
//! block, deadlines that have passed (`deadline <= now`) emit a note-off and
//! are cleared. A second note-on for the same number before its note-off
//! overwrites the deadline, so the earlier note is released late.

pub const NOTE_COUNT: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiEvent {
    NoteOn {
        timing: u32,
        channel: u8,
        note: u8,
        velocity: f32,
    },
    NoteOff {
        timing: u32,
        channel: u8,
        note: u8,
        velocity: f32,
    },
}

impl MidiEvent {
    pub fn note(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { note, .. } | MidiEvent::NoteOff { note, .. } => note,
        }
    }

    pub fn timing(&self) -> u32 {
        match *self {
            MidiEvent::NoteOn { timing, .. } | MidiEvent::NoteOff { timing, .. } => timing,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiEvent::NoteOn { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// How long each generated note sounds.
    pub hold_seconds: f32,
    /// Output MIDI channel, 0-based.
    pub channel: u8,
    pub velocity: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hold_seconds: 1.0,
            channel: 0,
            velocity: 0.5,
        }
    }
}

pub struct NoteScheduler {
    deadlines: [Option<u64>; NOTE_COUNT],
    hold_samples: u64,
    channel: u8,
    /// Absolute sample time of the current block's first sample.
    now: u64,
}

impl NoteScheduler {
    pub fn new(config: &SchedulerConfig, sample_rate: f32) -> Self {
        Self {
            deadlines: [None; NOTE_COUNT],
            hold_samples: hold_to_samples(config.hold_seconds, sample_rate),
            channel: config.channel.min(15),
            now: 0,
        }
    }

    pub fn set_hold(&mut self, seconds: f32, sample_rate: f32) {
        self.hold_samples = hold_to_samples(seconds, sample_rate);
    }

    pub fn hold_samples(&self) -> u64 {
        self.hold_samples
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn deadline(&self, note: u8) -> Option<u64> {
        self.deadlines.get(note as usize).copied().flatten()
    }

    /// Pending `(note, deadline)` pairs in note order.
    pub fn pending(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.deadlines
            .iter()
            .enumerate()
            .filter_map(|(note, d)| d.map(|d| (note as u8, d)))
    }

    /// Emit note-offs for every expired deadline. Call before any note-on of
    /// the block.
    pub fn begin_block(&mut self, mut emit: impl FnMut(MidiEvent)) {
        let now = self.now;
        for (note, slot) in self.deadlines.iter_mut().enumerate() {
            if matches!(*slot, Some(deadline) if deadline <= now) {
                *slot = None;
                emit(MidiEvent::NoteOff {
                    timing: 0,
                    channel: self.channel,
                    note: note as u8,
                    velocity: 0.0,
                });
            }
        }
    }

    /// Emit a note-on at the block start and arm its note-off.
    pub fn note_on(&mut self, note: u8, velocity: f32, mut emit: impl FnMut(MidiEvent)) {
        let Some(slot) = self.deadlines.get_mut(note as usize) else {
            return;
        };
        *slot = Some(self.now.saturating_add(self.hold_samples));
        emit(MidiEvent::NoteOn {
            timing: 0,
            channel: self.channel,
            note,
            velocity: velocity.clamp(0.0, 1.0),
        });
    }

    /// Advance the clock past a block of `len` samples.
    pub fn end_block(&mut self, len: u32) {
        self.now = self.now.saturating_add(u64::from(len));
    }

    /// Release every pending note now.
    pub fn all_notes_off(&mut self, mut emit: impl FnMut(MidiEvent)) {
        for (note, slot) in self.deadlines.iter_mut().enumerate() {
            if slot.take().is_some() {
                emit(MidiEvent::NoteOff {
                    timing: 0,
                    channel: self.channel,
                    note: note as u8,
                    velocity: 0.0,
                });
            }
        }
    }
}

/// Longest hold, about a week at 192 kHz.
const MAX_HOLD_SAMPLES: u64 = 1 << 37;

fn hold_to_samples(seconds: f32, sample_rate: f32) -> u64 {
    let samples = f64::from(seconds) * f64::from(sample_rate);
    if samples.is_nan() || samples <= 0.0 {
        return 1;
    }
    (samples.round().min(MAX_HOLD_SAMPLES as f64) as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 1000.0;

    fn scheduler(hold_seconds: f32) -> NoteScheduler {
        NoteScheduler::new(
            &SchedulerConfig {
                hold_seconds,
                ..Default::default()
            },
            SR,
        )
    }

    /// Run `blocks` blocks of `len` samples, triggering `on` notes at the
    /// given block indices. Returns (absolute time, event) pairs.
    fn run(
        s: &mut NoteScheduler,
        blocks: usize,
        len: u32,
        on: &[(usize, u8)],
    ) -> Vec<(u64, MidiEvent)> {
        let mut out = Vec::new();
        for b in 0..blocks {
            let t = s.now();
            s.begin_block(|e| out.push((t, e)));
            for &(_, note) in on.iter().filter(|(at, _)| *at == b) {
                s.note_on(note, 0.5, |e| out.push((t, e)));
            }
            s.end_block(len);
        }
        out
    }

    #[test]
    fn test_hold_from_seconds() {
        assert_eq!(scheduler(1.0).hold_samples(), 1000);
        assert_eq!(scheduler(0.25).hold_samples(), 250);
        assert_eq!(scheduler(0.0).hold_samples(), 1, "hold never collapses to zero");
    }

    #[test]
    fn test_one_note_off_after_hold() {
        let mut s = scheduler(0.1); // 100 samples
        let events = run(&mut s, 20, 32, &[(0, 60)]);

        let ons: Vec<_> = events.iter().filter(|(_, e)| e.is_note_on()).collect();
        let offs: Vec<_> = events.iter().filter(|(_, e)| !e.is_note_on()).collect();
        assert_eq!(ons.len(), 1);
        assert_eq!(offs.len(), 1, "exactly one note-off: {events:?}");
        let (t_on, _) = ons[0];
        let (t_off, off) = offs[0];
        assert_eq!(off.note(), 60);
        assert!(*t_off >= t_on + 100, "note-off at {t_off}, note-on at {t_on}");
        // First block boundary at or after the deadline.
        assert_eq!(*t_off, 128);
    }

    #[test]
    fn test_no_note_off_without_note_on() {
        let mut s = scheduler(0.01);
        let events = run(&mut s, 100, 64, &[]);
        assert!(events.is_empty(), "unexpected events: {events:?}");
    }

    #[test]
    fn test_deadline_exactly_at_block_start() {
        let mut s = scheduler(0.064); // 64 samples, same as block
        let events = run(&mut s, 3, 64, &[(0, 40)]);
        let offs: Vec<_> = events.iter().filter(|(_, e)| !e.is_note_on()).collect();
        assert_eq!(offs.len(), 1);
        assert_eq!(offs[0].0, 64);
    }

    #[test]
    fn test_last_writer_wins() {
        let mut s = scheduler(0.1);
        // Retrigger 60 at block 2 (t = 64): the first note's release moves
        // to 164 and only one note-off is ever sent.
        let events = run(&mut s, 20, 32, &[(0, 60), (2, 60)]);
        let offs: Vec<_> = events.iter().filter(|(_, e)| !e.is_note_on()).collect();
        assert_eq!(offs.len(), 1, "{events:?}");
        assert_eq!(offs[0].0, 192);
    }

    #[test]
    fn test_highest_note_released() {
        let mut s = scheduler(0.01);
        let events = run(&mut s, 4, 16, &[(0, 127)]);
        assert!(events.iter().any(|(_, e)| !e.is_note_on() && e.note() == 127));
        assert_eq!(s.pending().count(), 0);
    }

    #[test]
    fn test_out_of_range_note_ignored() {
        let mut s = scheduler(0.01);
        let mut out = Vec::new();
        s.note_on(200, 0.5, |e| out.push(e));
        assert!(out.is_empty());
        assert_eq!(s.pending().count(), 0);
    }

    #[test]
    fn test_all_notes_off() {
        let mut s = scheduler(10.0);
        let mut out = Vec::new();
        for note in [10, 20, 30] {
            s.note_on(note, 0.5, |e| out.push(e));
        }
        assert_eq!(s.pending().map(|(n, _)| n).collect::<Vec<_>>(), [10, 20, 30]);
        out.clear();
        s.all_notes_off(|e| out.push(e));
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|e| !e.is_note_on()));
        assert_eq!(s.pending().count(), 0);
    }

    #[test]
    fn test_events_use_configured_channel() {
        let mut s = NoteScheduler::new(
            &SchedulerConfig {
                channel: 3,
                velocity: 0.8,
                hold_seconds: 0.001,
            },
            SR,
        );
        let mut out = Vec::new();
        s.note_on(64, 0.8, |e| out.push(e));
        s.end_block(8);
        s.begin_block(|e| out.push(e));
        assert_eq!(
            out,
            [
                MidiEvent::NoteOn {
                    timing: 0,
                    channel: 3,
                    note: 64,
                    velocity: 0.8,
                },
                MidiEvent::NoteOff {
                    timing: 0,
                    channel: 3,
                    note: 64,
                    velocity: 0.0,
                },
            ]
        );
    }

    #[test]
    fn test_huge_hold_never_releases_early() {
        let mut s = scheduler(1.0);
        for seconds in [f32::INFINITY, f32::MAX, 1.0e12] {
            s.set_hold(seconds, 48_000.0);
            assert_eq!(s.hold_samples(), MAX_HOLD_SAMPLES);
        }
        s.set_hold(f32::NAN, 48_000.0);
        assert_eq!(s.hold_samples(), 1);

        s.set_hold(f32::INFINITY, 48_000.0);
        s.end_block(64);
        s.note_on(60, 0.5, |_| {});
        assert_eq!(s.deadline(60), Some(64 + MAX_HOLD_SAMPLES));

        let events = run(&mut s, 50, 512, &[]);
        assert!(events.is_empty(), "released early: {events:?}");
        assert_eq!(s.pending().count(), 1);
    }

    #[test]
    fn test_set_hold_applies_to_new_notes() {
        let mut s = scheduler(1.0);
        s.set_hold(0.5, 48_000.0);
        assert_eq!(s.hold_samples(), 24_000);
        s.note_on(1, 0.5, |_| {});
        assert_eq!(s.deadline(1), Some(24_000));
    }
}
