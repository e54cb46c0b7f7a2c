// THEORY:
// A `MixtureComponent` is one Gaussian hypothesis about what a single pixel
// "usually" looks like: a mean intensity, a spread, and how much evidence backs it.
// A pixel owns `MIXTURES` of them, kept ranked by `sort_key` so that the most
// confident and tightest hypothesis always sits in slot 0.
//
// Liveness is not stored as a flag. A slot whose weight is below
// `WEIGHT_EPSILON` is dormant: it has never been filled since the last reset, and
// because slots are ranked, every slot after a dormant one is dormant too. The
// matching pass relies on this to stop scanning without a separate counter.

/// Number of mixture components tracked per pixel.
pub const MIXTURES: usize = 2;

/// Weights below this value mark a dormant (never initialized) slot.
pub const WEIGHT_EPSILON: f32 = f32::EPSILON;

/// One Gaussian hypothesis for a pixel's intensity distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MixtureComponent {
    /// `weight / sqrt(var)`. Ranks components by confidence and tightness.
    pub sort_key: f32,
    /// Relative share of the pixel's observations explained by this component.
    pub weight: f32,
    /// Estimated center of the intensity distribution.
    pub mean: f32,
    /// Estimated variance, floored at `noise_sigma²` whenever it is updated.
    pub var: f32,
}

impl MixtureComponent {
    /// The all-zero state every slot returns to on reset.
    pub const ZERO: MixtureComponent = MixtureComponent {
        sort_key: 0.0,
        weight: 0.0,
        mean: 0.0,
        var: 0.0,
    };

    pub fn is_live(&self) -> bool {
        self.weight >= WEIGHT_EPSILON
    }

    /// Squared distance between `pixel` and this component's mean.
    #[inline]
    pub fn squared_deviation(&self, pixel: f32) -> f32 {
        let diff = pixel - self.mean;
        diff * diff
    }
}
