// NeuralFX: LSTM amp/distortion effect plugin (CLAP + VST3).

use neuralfx_dsp::stream::{AudioEffect, SharedControls, StreamConfig, StreamProcessor};
use neuralfx_dsp::weights::{LoaderConfig, WeightBlob};
use nih_plug::prelude::*;
use std::num::NonZeroU32;
use std::sync::Arc;

mod params;
use params::NeuralFxParams;

/// Weight file used when `NEURALFX_MODEL` is not set.
const BUNDLED_MODEL: &str = include_str!("../../../models/amp-drive.json");
const MODEL_ENV: &str = "NEURALFX_MODEL";
const ALT_MODEL_ENV: &str = "NEURALFX_ALT_MODEL";

struct NeuralFx {
    params: Arc<NeuralFxParams>,
    /// Built on the first `initialize`; `None` until a model loaded.
    engine: Option<StreamProcessor>,
    controls: Arc<SharedControls>,
}

impl Default for NeuralFx {
    fn default() -> Self {
        Self {
            params: Arc::new(NeuralFxParams::default()),
            engine: None,
            controls: Arc::new(SharedControls::default()),
        }
    }
}

/// Weights named by an environment variable, if it is set.
fn model_from_env(
    var: &str,
    loader: &LoaderConfig,
) -> neuralfx_dsp::Result<Option<Arc<WeightBlob>>> {
    let Some(path) = std::env::var_os(var) else {
        return Ok(None);
    };
    nih_log!("loading model from {} ({var})", path.to_string_lossy());
    let blob = WeightBlob::open_inferred(&path, loader)?;
    Ok(Some(Arc::new(blob)))
}

fn build_engine() -> neuralfx_dsp::Result<StreamProcessor> {
    let loader = LoaderConfig::default();
    let primary = match model_from_env(MODEL_ENV, &loader)? {
        Some(blob) => blob,
        None => Arc::new(WeightBlob::parse_inferred(BUNDLED_MODEL, &loader)?),
    };
    let topology = *primary.topology();
    let mut engine = StreamProcessor::new(primary)?;
    nih_log!(
        "model ready: {} in, {} hidden x {} layers, {} out",
        topology.input_size,
        topology.hidden_size,
        topology.layer_count,
        topology.output_size
    );

    if let Some(alt) = model_from_env(ALT_MODEL_ENV, &loader)? {
        engine.set_alternate(alt)?;
        nih_log!("alternate model ready");
    }
    Ok(engine)
}

impl Plugin for NeuralFx {
    const NAME: &'static str = "NeuralFX";
    const VENDOR: &'static str = "NeuralFX";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            aux_input_ports: &[],
            aux_output_ports: &[],
            names: PortNames::const_default(),
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            aux_input_ports: &[],
            aux_output_ports: &[],
            names: PortNames::const_default(),
        },
    ];

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        _context: &mut impl InitContext<Self>,
    ) -> bool {
        if self.engine.is_none() {
            match build_engine() {
                Ok(engine) => {
                    self.controls = engine.controls();
                    self.engine = Some(engine);
                }
                Err(e) => {
                    nih_error!("failed to load model: {e}");
                    return false;
                }
            }
        }

        let config = StreamConfig {
            sample_rate: buffer_config.sample_rate,
            max_block_size: buffer_config.max_buffer_size as usize,
            channels: audio_io_layout
                .main_output_channels
                .map_or(0, NonZeroU32::get) as usize,
        };
        if let Some(engine) = self.engine.as_mut() {
            engine.prepare(&config);
        }
        true
    }

    fn reset(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.reset();
        }
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let Some(engine) = self.engine.as_mut() else {
            return ProcessStatus::Normal;
        };

        // Held for the whole block.
        self.controls.set_control(self.params.control.value());
        self.controls.set_bypassed(self.params.bypass.value());
        self.controls
            .set_alternate_on_bypass(self.params.alternate_on_bypass.value());

        // A stopped host may still report a position; only a playing one seeks.
        let transport = context.transport();
        let position = transport.playing.then(|| transport.pos_samples()).flatten();
        engine.process_block_at(buffer.as_slice(), position);

        ProcessStatus::Normal
    }
}

impl ClapPlugin for NeuralFx {
    const CLAP_ID: &'static str = "com.neuralfx.lstm-amp";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("Neural amp and distortion modeling with a streaming LSTM");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Stereo,
        ClapFeature::Mono,
        ClapFeature::Distortion,
    ];
}

impl Vst3Plugin for NeuralFx {
    const VST3_CLASS_ID: [u8; 16] = *b"NeuralFxLstmAmp1";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Fx, Vst3SubCategory::Distortion];
}

nih_export_clap!(NeuralFx);
nih_export_vst3!(NeuralFx);
