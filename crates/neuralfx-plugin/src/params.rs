use nih_plug::prelude::*;

#[derive(Params)]
pub struct NeuralFxParams {
    /// Conditioning input fed to the network next to each sample
    /// (0 = off, 1 = full). Ignored by single-input models.
    #[id = "control"]
    pub control: FloatParam,

    #[id = "bypass"]
    pub bypass: BoolParam,

    /// While bypassed, run the alternate model instead of passing audio
    /// through. No effect unless an alternate model is loaded.
    #[id = "alt_bypass"]
    pub alternate_on_bypass: BoolParam,
}

impl Default for NeuralFxParams {
    fn default() -> Self {
        Self {
            control: FloatParam::new(
                "Control",
                0.5,
                FloatRange::Linear {
                    min: 0.0,
                    max: 1.0,
                },
            )
            .with_unit(" %")
            .with_value_to_string(formatters::v2s_f32_percentage(0))
            .with_string_to_value(formatters::s2v_f32_percentage()),

            bypass: BoolParam::new("Bypass", false).make_bypass(),

            alternate_on_bypass: BoolParam::new("Alternate Model on Bypass", false),
        }
    }
}
