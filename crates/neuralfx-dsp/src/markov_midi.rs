//! MIDI generator: learns note transitions from incoming note-ons and
//! answers each with a sampled successor.
//!
//! Per block:
//! 1. if the host reset us, release every sounding note;
//! 2. release notes whose hold time has passed;
//! 3. for each incoming note-on, learn it, sample a successor and play it.
//!
//! Incoming events are consumed. Only generated notes go out.

use crate::markov::MarkovChain;
use crate::scheduler::{MidiEvent, NoteScheduler, SchedulerConfig};

pub struct MarkovMidiProcessor {
    chain: MarkovChain,
    scheduler: NoteScheduler,
    velocity: f32,
    flush_pending: bool,
}

impl MarkovMidiProcessor {
    pub fn new(config: &SchedulerConfig, sample_rate: f32) -> Self {
        Self::with_chain(MarkovChain::new(), config, sample_rate)
    }

    pub fn with_chain(chain: MarkovChain, config: &SchedulerConfig, sample_rate: f32) -> Self {
        Self {
            chain,
            scheduler: NoteScheduler::new(config, sample_rate),
            velocity: config.velocity,
            flush_pending: false,
        }
    }

    pub fn chain(&self) -> &MarkovChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut MarkovChain {
        &mut self.chain
    }

    pub fn scheduler(&self) -> &NoteScheduler {
        &self.scheduler
    }

    pub fn set_hold(&mut self, seconds: f32, sample_rate: f32) {
        self.scheduler.set_hold(seconds, sample_rate);
    }

    pub fn set_velocity(&mut self, velocity: f32) {
        self.velocity = velocity;
    }

    /// Transport stopped or jumped. Sounding notes are released at the start
    /// of the next block; learned transitions are kept.
    pub fn reset(&mut self) {
        self.flush_pending = true;
        self.chain.reset_history();
    }

    pub fn begin_block(&mut self, mut emit: impl FnMut(MidiEvent)) {
        if self.flush_pending {
            self.flush_pending = false;
            self.scheduler.all_notes_off(&mut emit);
        }
        self.scheduler.begin_block(emit);
    }

    /// Learn `note` and play the generated successor, if any.
    pub fn note_on(&mut self, note: u8, emit: impl FnMut(MidiEvent)) {
        self.chain.put_event(&note.to_string());
        let token = self.chain.get_event(false);
        if let Some(next) = parse_note(&token) {
            self.scheduler.note_on(next, self.velocity, emit);
        }
    }

    pub fn end_block(&mut self, len: u32) {
        self.scheduler.end_block(len);
    }

    /// One whole block: note-offs from `incoming` and other events are
    /// dropped, note-ons drive the generator.
    pub fn process_block(
        &mut self,
        incoming: &[MidiEvent],
        len: u32,
        mut emit: impl FnMut(MidiEvent),
    ) {
        self.begin_block(&mut emit);
        for event in incoming {
            if let MidiEvent::NoteOn { note, .. } = *event {
                self.note_on(note, &mut emit);
            }
        }
        self.end_block(len);
    }
}

/// A token names a playable note only if it is a MIDI note number.
fn parse_note(token: &str) -> Option<u8> {
    token.parse::<u8>().ok().filter(|&n| (n as usize) < crate::scheduler::NOTE_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 1000.0;

    fn processor(hold_seconds: f32) -> MarkovMidiProcessor {
        MarkovMidiProcessor::with_chain(
            MarkovChain::with_seed(1, 11),
            &SchedulerConfig {
                hold_seconds,
                ..Default::default()
            },
            SR,
        )
    }

    fn on(note: u8) -> MidiEvent {
        MidiEvent::NoteOn {
            timing: 5,
            channel: 0,
            note,
            velocity: 1.0,
        }
    }

    fn off(note: u8) -> MidiEvent {
        MidiEvent::NoteOff {
            timing: 9,
            channel: 0,
            note,
            velocity: 0.0,
        }
    }

    fn block(p: &mut MarkovMidiProcessor, incoming: &[MidiEvent], len: u32) -> Vec<MidiEvent> {
        let mut out = Vec::new();
        p.process_block(incoming, len, |e| out.push(e));
        out
    }

    #[test]
    fn test_first_note_is_silent() {
        let mut p = processor(0.1);
        // Nothing has been learned yet, so the successor is a rest.
        assert!(block(&mut p, &[on(60)], 64).is_empty());
        assert_eq!(p.chain().state_count(), 0);
    }

    #[test]
    fn test_learns_and_replays() {
        let mut p = processor(0.05);
        // 60 -> 62 -> 60: the last note-on has a single known successor.
        let out = block(&mut p, &[on(60), on(62), on(60)], 64);
        let ons: Vec<u8> = out
            .iter()
            .filter(|e| e.is_note_on())
            .map(|e| e.note())
            .collect();
        // After 62 arrives nothing has followed 62 yet; after the second 60,
        // "60" -> "62" is known.
        assert_eq!(ons, [62]);
        let first = out.iter().find(|e| e.is_note_on()).copied();
        assert_eq!(
            first,
            Some(MidiEvent::NoteOn {
                timing: 0,
                channel: 0,
                note: 62,
                velocity: 0.5,
            })
        );
    }

    #[test]
    fn test_generated_notes_released() {
        let mut p = processor(0.05); // 50 samples
        let mut all = block(&mut p, &[on(60), on(62), on(60)], 32);
        for _ in 0..4 {
            all.extend(block(&mut p, &[], 32));
        }
        let offs: Vec<u8> = all
            .iter()
            .filter(|e| !e.is_note_on())
            .map(|e| e.note())
            .collect();
        assert_eq!(offs, [62]);
        assert_eq!(p.scheduler().pending().count(), 0);
    }

    #[test]
    fn test_incoming_note_offs_dropped() {
        let mut p = processor(10.0);
        let out = block(&mut p, &[off(60), off(61)], 64);
        assert!(out.is_empty());
        assert_eq!(p.chain().state_count(), 0);
    }

    #[test]
    fn test_reset_flushes_sounding_notes() {
        let mut p = processor(10.0);
        block(&mut p, &[on(60), on(62), on(60)], 64);
        assert_eq!(p.scheduler().pending().count(), 1);

        p.reset();
        let out = block(&mut p, &[], 64);
        assert_eq!(
            out,
            [MidiEvent::NoteOff {
                timing: 0,
                channel: 0,
                note: 62,
                velocity: 0.0,
            }]
        );
        assert_eq!(p.chain().history().count(), 0);
        assert!(p.chain().state_count() > 0, "reset keeps learned transitions");
    }

    #[test]
    fn test_velocity_setting() {
        let mut p = processor(1.0);
        p.set_velocity(0.9);
        let out = block(&mut p, &[on(1), on(2), on(1)], 16);
        assert!(
            out.iter()
                .any(|e| matches!(e, MidiEvent::NoteOn { velocity, .. } if *velocity == 0.9))
        );
    }

    #[test]
    fn test_parse_note() {
        assert_eq!(parse_note("0"), Some(0));
        assert_eq!(parse_note("127"), Some(127));
        assert_eq!(parse_note("128"), None);
        assert_eq!(parse_note("rest"), None);
        assert_eq!(parse_note("-1"), None);
    }
}
