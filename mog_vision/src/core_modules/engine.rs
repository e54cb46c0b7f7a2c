// THEORY:
// The engine is the learning heart of the system. For every pixel of a frame it
// asks one question of that pixel's ranked mixture: "which of my hypotheses
// explains this intensity?", and then answers a second one: "is that hypothesis
// part of the background?"
//
// Key architectural principles:
// 1.  **Online Learning**: With a positive learning rate, the first matching
//     component is pulled toward the observation (exponential moving averages of
//     weight, mean and variance). When nothing matches, the weakest slot is
//     overwritten by a fresh, wide, low-weight hypothesis centered on the pixel.
// 2.  **Ranking**: Components stay sorted by `weight / sqrt(var)`. Each update
//     changes exactly one component's key, so a single insertion step (left or
//     right) restores the order instead of a full sort.
// 3.  **Background Mass**: After renormalizing the weights to sum to one, the
//     highest-ranked components whose cumulative weight first exceeds the
//     background ratio form the background. A pixel explained by anything ranked
//     at or after that cutoff is foreground.
// 4.  **Frozen Mode**: A learning rate of zero classifies against the existing
//     model without touching it, so repeated calls are idempotent.
//
// Pixels never read each other's models, which is what lets `parallel_pipeline`
// split a frame into bands without any synchronization inside a frame.

use crate::core_modules::mixture::{MIXTURES, MixtureComponent};
use crate::core_modules::model_store::ModelStore;
use crate::error::{Result, VisionError};

/// Fraction of cumulative weight treated as background.
pub const DEFAULT_BACKGROUND_RATIO: f64 = 0.7;
/// Squared number of standard deviations within which a pixel matches (2.5σ).
pub const DEFAULT_VAR_THRESHOLD: f64 = 2.5 * 2.5;
/// Variance floor and initialization scale, as a standard deviation.
pub const DEFAULT_NOISE_SIGMA: f64 = 30.0 * 0.5;
/// Weight given to a freshly inserted component before renormalization.
pub const DEFAULT_INITIAL_WEIGHT: f64 = 0.05;

/// Mask value for a background pixel.
pub const BACKGROUND: u8 = 0;
/// Mask value for a foreground pixel.
pub const FOREGROUND: u8 = 255;

/// Policy parameters for a single `update_and_classify` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixtureParams {
    /// Blend factor for matched components. Zero (or below) freezes the model.
    pub learning_rate: f64,
    pub background_ratio: f64,
    pub var_threshold: f64,
    pub noise_sigma: f64,
    pub initial_weight: f64,
}

impl MixtureParams {
    /// The default policy with the given learning rate.
    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            background_ratio: DEFAULT_BACKGROUND_RATIO,
            var_threshold: DEFAULT_VAR_THRESHOLD,
            noise_sigma: DEFAULT_NOISE_SIGMA,
            initial_weight: DEFAULT_INITIAL_WEIGHT,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() {
            return Err(VisionError::InvalidLearningRate(self.learning_rate));
        }
        if !(self.background_ratio > 0.0 && self.background_ratio <= 1.0) {
            return Err(VisionError::InvalidConfig(format!(
                "background ratio must be in (0, 1], got {}",
                self.background_ratio
            )));
        }
        if !(self.var_threshold > 0.0 && self.var_threshold.is_finite()) {
            return Err(VisionError::InvalidConfig(format!(
                "variance threshold must be positive, got {}",
                self.var_threshold
            )));
        }
        if !(self.noise_sigma > 0.0 && self.noise_sigma.is_finite()) {
            return Err(VisionError::InvalidConfig(format!(
                "noise sigma must be positive, got {}",
                self.noise_sigma
            )));
        }
        if !(self.initial_weight > 0.0 && self.initial_weight < 1.0) {
            return Err(VisionError::InvalidConfig(format!(
                "initial weight must be in (0, 1), got {}",
                self.initial_weight
            )));
        }
        Ok(())
    }
}

/// `MixtureParams` narrowed to `f32` and pre-combined for the per-pixel loop.
struct Prepared {
    alpha: f32,
    background_ratio: f32,
    var_threshold: f32,
    min_var: f32,
    fresh: MixtureComponent,
}

impl Prepared {
    fn new(params: &MixtureParams) -> Self {
        let w0 = params.initial_weight as f32;
        let sigma = params.noise_sigma as f32;
        Self {
            alpha: params.learning_rate as f32,
            background_ratio: params.background_ratio as f32,
            var_threshold: params.var_threshold as f32,
            min_var: sigma * sigma,
            fresh: MixtureComponent {
                sort_key: w0 / (2.0 * sigma),
                weight: w0,
                mean: 0.0,
                var: 4.0 * sigma * sigma,
            },
        }
    }
}

/// Classifies every pixel of `frame_in` into `frame_out`, learning from it when
/// `params.learning_rate > 0`.
///
/// Both buffers must hold exactly `store.width() * store.height()` bytes in
/// row-major order. Returns the number of pixels marked foreground.
pub fn update_and_classify(
    store: &mut ModelStore,
    frame_in: &[u8],
    frame_out: &mut [u8],
    params: &MixtureParams,
) -> Result<usize> {
    let pixel_count = store.pixel_count();
    VisionError::check_len("input", pixel_count, frame_in.len())?;
    VisionError::check_len("output", pixel_count, frame_out.len())?;
    params.validate()?;
    if pixel_count == 0 {
        return Ok(0);
    }

    let prepared = Prepared::new(params);
    let learning = prepared.alpha > 0.0;
    let width = store.width() as usize;
    let mut foreground_pixels = 0;

    let rows = frame_in
        .chunks_exact(width)
        .zip(frame_out.chunks_exact_mut(width))
        .zip(store.rows_mut());

    for ((src, dst), models) in rows {
        for ((&value, out), model) in src
            .iter()
            .zip(dst.iter_mut())
            .zip(models.chunks_exact_mut(MIXTURES))
        {
            let pixel = value as f32;
            let is_foreground = if learning {
                update_pixel(model, pixel, &prepared)
            } else {
                classify_pixel(model, pixel, &prepared)
            };
            *out = if is_foreground { FOREGROUND } else { BACKGROUND };
            foreground_pixels += is_foreground as usize;
        }
    }

    Ok(foreground_pixels)
}

/// Learns from one observation and reports whether it is foreground.
fn update_pixel(model: &mut [MixtureComponent], pixel: f32, p: &Prepared) -> bool {
    let mut scanned = 0;
    let mut matched = None;

    for (k, component) in model.iter_mut().enumerate() {
        if !component.is_live() {
            break;
        }
        scanned = k + 1;

        let diff = pixel - component.mean;
        let d2 = diff * diff;
        if d2 < p.var_threshold * component.var {
            component.weight += p.alpha * (1.0 - component.weight);
            component.mean += p.alpha * diff;
            component.var = (component.var + p.alpha * (d2 - component.var)).max(p.min_var);
            component.sort_key = component.weight / component.var.sqrt();
            matched = Some(k);
            break;
        }
    }

    let changed = match matched {
        Some(k) => k,
        None => {
            // Replace the weakest slot: the first dormant one, or the last live one.
            let k = scanned.min(MIXTURES - 1);
            model[k] = MixtureComponent {
                mean: pixel,
                ..p.fresh
            };
            k
        }
    };
    let rank = restore_order(model, changed);

    let total: f32 = model.iter().map(|c| c.weight).sum();
    let scale = 1.0 / total;
    let mut cumulative = 0.0;
    let mut cutoff = None;
    for (k, component) in model.iter_mut().enumerate() {
        component.weight *= scale;
        component.sort_key *= scale;
        cumulative += component.weight;
        if cutoff.is_none() && cumulative > p.background_ratio {
            cutoff = Some(k + 1);
        }
    }

    is_foreground(rank, cutoff)
}

/// Classifies one observation against a frozen model.
fn classify_pixel(model: &[MixtureComponent], pixel: f32, p: &Prepared) -> bool {
    let hit = model
        .iter()
        .take_while(|c| c.is_live())
        .position(|c| c.squared_deviation(pixel) < p.var_threshold * c.var);

    match hit {
        Some(rank) => is_foreground(rank, cutoff_rank(model, p.background_ratio)),
        None => true,
    }
}

/// Moves `model[index]` to its place in descending `sort_key` order, assuming
/// every other component is already ordered. Returns its new rank.
fn restore_order(model: &mut [MixtureComponent], index: usize) -> usize {
    let mut k = index;
    while k > 0 && model[k - 1].sort_key < model[k].sort_key {
        model.swap(k - 1, k);
        k -= 1;
    }
    while k + 1 < model.len() && model[k + 1].sort_key > model[k].sort_key {
        model.swap(k, k + 1);
        k += 1;
    }
    k
}

/// First rank past the components whose cumulative weight exceeds `ratio`.
fn cutoff_rank(model: &[MixtureComponent], ratio: f32) -> Option<usize> {
    let mut cumulative = 0.0;
    for (k, component) in model.iter().enumerate() {
        cumulative += component.weight;
        if cumulative > ratio {
            return Some(k + 1);
        }
    }
    None
}

fn is_foreground(rank: usize, cutoff: Option<usize>) -> bool {
    cutoff.is_none_or(|cutoff| rank >= cutoff)
}

/// Per-pixel background estimate: the mean of the top-ranked live component,
/// or 0 where the model has not seen any data yet.
pub fn estimate_background(store: &ModelStore) -> Vec<u8> {
    store
        .pixels()
        .map(|model| match model.first() {
            Some(top) if top.is_live() => top.mean.round().clamp(0.0, 255.0) as u8,
            _ => 0,
        })
        .collect()
}
