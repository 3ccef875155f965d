// NeuralFX Markov: MIDI note generator plugin (CLAP + VST3).
//
// Learns note-to-note transitions from incoming note-ons and answers each
// one with a sampled successor. The input MIDI stream is replaced by the
// generated notes.

use neuralfx_dsp::markov_midi::MarkovMidiProcessor;
use neuralfx_dsp::scheduler::{MidiEvent, SchedulerConfig};
use nih_plug::prelude::*;
use std::sync::Arc;

mod params;
use params::MarkovParams;

struct NeuralFxMarkov {
    params: Arc<MarkovParams>,
    generator: MarkovMidiProcessor,
    sample_rate: f32,
}

impl Default for NeuralFxMarkov {
    fn default() -> Self {
        let sample_rate = 44100.0;
        Self {
            params: Arc::new(MarkovParams::default()),
            generator: MarkovMidiProcessor::new(&SchedulerConfig::default(), sample_rate),
            sample_rate,
        }
    }
}

fn to_note_event(event: MidiEvent) -> NoteEvent<()> {
    match event {
        MidiEvent::NoteOn {
            timing,
            channel,
            note,
            velocity,
        } => NoteEvent::NoteOn {
            timing,
            voice_id: None,
            channel,
            note,
            velocity,
        },
        MidiEvent::NoteOff {
            timing,
            channel,
            note,
            velocity,
        } => NoteEvent::NoteOff {
            timing,
            voice_id: None,
            channel,
            note,
            velocity,
        },
    }
}

impl Plugin for NeuralFxMarkov {
    const NAME: &'static str = "NeuralFX Markov";
    const VENDOR: &'static str = "NeuralFX";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    // Note effect: MIDI in, MIDI out, no audio.
    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[];

    const MIDI_INPUT: MidiConfig = MidiConfig::Basic;
    const MIDI_OUTPUT: MidiConfig = MidiConfig::Basic;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        _audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        _context: &mut impl InitContext<Self>,
    ) -> bool {
        self.sample_rate = buffer_config.sample_rate;
        self.generator
            .set_hold(self.params.hold.value(), self.sample_rate);
        nih_log!(
            "markov generator ready at {} Hz, order {}",
            self.sample_rate,
            self.generator.chain().order()
        );
        true
    }

    fn reset(&mut self) {
        // Sounding notes get their note-offs at the start of the next block.
        self.generator.reset();
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        self.generator
            .set_hold(self.params.hold.value(), self.sample_rate);
        self.generator.set_velocity(self.params.velocity.value());

        self.generator
            .begin_block(|e| context.send_event(to_note_event(e)));

        while let Some(event) = context.next_event() {
            if let NoteEvent::NoteOn { note, .. } = event {
                self.generator
                    .note_on(note, |e| context.send_event(to_note_event(e)));
            }
        }

        self.generator.end_block(buffer.samples() as u32);

        ProcessStatus::Normal
    }
}

impl ClapPlugin for NeuralFxMarkov {
    const CLAP_ID: &'static str = "com.neuralfx.markov";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("Generates notes from a Markov chain learned from your playing");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[ClapFeature::NoteEffect, ClapFeature::Utility];
}

impl Vst3Plugin for NeuralFxMarkov {
    const VST3_CLASS_ID: [u8; 16] = *b"NeuralFxMarkovGn";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Instrument, Vst3SubCategory::Tools];
}

nih_export_clap!(NeuralFxMarkov);
nih_export_vst3!(NeuralFxMarkov);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_event_conversion() {
        let on = to_note_event(MidiEvent::NoteOn {
            timing: 0,
            channel: 0,
            note: 62,
            velocity: 0.5,
        });
        match on {
            NoteEvent::NoteOn {
                timing,
                voice_id,
                channel,
                note,
                velocity,
            } => {
                assert_eq!((timing, voice_id, channel, note), (0, None, 0, 62));
                assert_eq!(velocity, 0.5);
            }
            other => panic!("expected note-on, got {other:?}"),
        }

        let off = to_note_event(MidiEvent::NoteOff {
            timing: 0,
            channel: 2,
            note: 127,
            velocity: 0.0,
        });
        assert!(matches!(off, NoteEvent::NoteOff { note: 127, channel: 2, .. }));
    }
}
