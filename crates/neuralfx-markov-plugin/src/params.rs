use nih_plug::prelude::*;

#[derive(Params)]
pub struct MarkovParams {
    /// How long each generated note is held before its note-off.
    #[id = "hold"]
    pub hold: FloatParam,

    #[id = "velocity"]
    pub velocity: FloatParam,
}

impl Default for MarkovParams {
    fn default() -> Self {
        Self {
            hold: FloatParam::new(
                "Hold",
                1.0,
                FloatRange::Skewed {
                    min: 0.05,
                    max: 8.0,
                    factor: FloatRange::skew_factor(-1.0),
                },
            )
            .with_unit(" s")
            .with_step_size(0.01),

            velocity: FloatParam::new(
                "Velocity",
                0.5,
                FloatRange::Linear {
                    min: 0.0,
                    max: 1.0,
                },
            )
            .with_unit(" %")
            .with_value_to_string(formatters::v2s_f32_percentage(0))
            .with_string_to_value(formatters::s2v_f32_percentage()),
        }
    }
}
