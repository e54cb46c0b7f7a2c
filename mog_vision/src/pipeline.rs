// THEORY:
// The `pipeline` module is the top-level API of the engine. It owns everything
// that used to be process-wide state (the model store and the frame counter) in
// a single `BackgroundSubtractor` value, so a caller can run as many independent
// streams as it likes.
//
// Its `Lifecycle` decides two things per frame:
// 1.  **Reset**: On the very first frame, or whenever the caller asks for a
//     learning rate of 1 or more, the model is wiped and the stream starts over.
// 2.  **Warm-up Schedule**: Until the caller supplies a usable rate, the effective
//     rate is `1 / min(frame, history)`. Frame 1 trusts the observation fully,
//     and the rate decays toward `1 / history` as evidence accumulates.
//
// The lifecycle is kept separate from the store so that `parallel_pipeline` can
// drive many band-sized stores with one schedule.

use crate::core_modules::engine::{
    self, DEFAULT_BACKGROUND_RATIO, DEFAULT_INITIAL_WEIGHT, DEFAULT_NOISE_SIGMA,
    DEFAULT_VAR_THRESHOLD, MixtureParams,
};
use crate::core_modules::mixture::MixtureComponent;
use crate::core_modules::model_store::ModelStore;
use crate::error::{Result, VisionError};
use image::GrayImage;

/// Number of frames after which the warm-up schedule stops decaying.
pub const DEFAULT_HISTORY: u32 = 200;

/// Configuration for a `BackgroundSubtractor` or `ParallelPipeline`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtractorConfig {
    pub image_width: u32,
    pub image_height: u32,
    /// Frames of evidence the warm-up schedule accumulates before its rate stops decaying.
    pub history: u32,
    /// Fraction of cumulative component weight considered background.
    pub background_ratio: f64,
    /// Squared multiple of the standard deviation that counts as a match.
    pub var_threshold: f64,
    /// Variance floor and initial spread, expressed as a standard deviation.
    pub noise_sigma: f64,
    /// Weight given to a newly created component.
    pub initial_weight: f64,
}

impl SubtractorConfig {
    /// A configuration for `image_width` x `image_height` frames with the default policy.
    pub fn new(image_width: u32, image_height: u32) -> Self {
        Self {
            image_width,
            image_height,
            history: DEFAULT_HISTORY,
            background_ratio: DEFAULT_BACKGROUND_RATIO,
            var_threshold: DEFAULT_VAR_THRESHOLD,
            noise_sigma: DEFAULT_NOISE_SIGMA,
            initial_weight: DEFAULT_INITIAL_WEIGHT,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.image_width as usize * self.image_height as usize
    }

    /// Engine parameters for one frame at the given effective learning rate.
    pub fn mixture_params(&self, learning_rate: f64) -> MixtureParams {
        MixtureParams {
            learning_rate,
            background_ratio: self.background_ratio,
            var_threshold: self.var_threshold,
            noise_sigma: self.noise_sigma,
            initial_weight: self.initial_weight,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(VisionError::InvalidConfig(format!(
                "image must be at least 1x1, got {}x{}",
                self.image_width, self.image_height
            )));
        }
        if self.history == 0 {
            return Err(VisionError::InvalidConfig("history must be at least 1".into()));
        }
        self.mixture_params(0.0).validate()
    }
}

/// What happened while processing one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// 1-based index of the frame since the last reset.
    pub frame_index: u64,
    /// Learning rate handed to the engine.
    pub learning_rate: f64,
    /// Whether the model was wiped before this frame.
    pub reset: bool,
    pub foreground_pixels: usize,
}

impl FrameStats {
    pub fn foreground_ratio(&self, pixel_count: usize) -> f64 {
        if pixel_count == 0 {
            return 0.0;
        }
        self.foreground_pixels as f64 / pixel_count as f64
    }
}

/// Decision made by the `Lifecycle` at the start of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    pub frame_index: u64,
    pub learning_rate: f64,
    /// The model store must be zeroed before the frame is processed.
    pub reset: bool,
}

/// Frame counter plus the reset and warm-up policy.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    frames: u64,
    history: u32,
}

impl Lifecycle {
    pub fn new(history: u32) -> Self {
        Self { frames: 0, history }
    }

    /// Frames processed since the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Forces the next frame to start a fresh sequence.
    pub fn invalidate(&mut self) {
        self.frames = 0;
    }

    /// Advances the counter and picks the effective learning rate.
    ///
    /// A negative `requested` rate selects the warm-up schedule. A rate of 1 or
    /// more restarts the sequence.
    pub fn begin_frame(&mut self, requested: f64) -> Result<FramePlan> {
        if requested.is_nan() {
            return Err(VisionError::InvalidLearningRate(requested));
        }

        let reset = self.frames == 0 || requested >= 1.0;
        if reset {
            self.frames = 0;
        }
        self.frames += 1;

        let learning_rate = if requested >= 0.0 && self.frames > 1 {
            requested
        } else {
            1.0 / self.frames.min(self.history as u64) as f64
        };

        Ok(FramePlan {
            frame_index: self.frames,
            learning_rate,
            reset,
        })
    }
}

/// A single-stream background subtractor: one model store, one lifecycle.
pub struct BackgroundSubtractor {
    config: SubtractorConfig,
    store: ModelStore,
    lifecycle: Lifecycle,
}

impl BackgroundSubtractor {
    pub fn new(config: SubtractorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: ModelStore::new(config.image_width, config.image_height),
            lifecycle: Lifecycle::new(config.history),
            config,
        })
    }

    pub fn config(&self) -> &SubtractorConfig {
        &self.config
    }

    pub fn frame_count(&self) -> u64 {
        self.lifecycle.frame_count()
    }

    /// Classifies `frame_in` into `frame_out` and updates the model.
    ///
    /// `learning_rate` follows the lifecycle rules: negative for the warm-up
    /// schedule, 0 to classify without learning, 1 or more to restart.
    pub fn step(&mut self, frame_in: &[u8], frame_out: &mut [u8], learning_rate: f64) -> Result<FrameStats> {
        let pixel_count = self.config.pixel_count();
        VisionError::check_len("input", pixel_count, frame_in.len())?;
        VisionError::check_len("output", pixel_count, frame_out.len())?;

        let plan = self.lifecycle.begin_frame(learning_rate)?;
        if plan.reset {
            log::debug!(
                "resetting {}x{} background model",
                self.config.image_width,
                self.config.image_height
            );
            self.store.reset();
        }

        let params = self.config.mixture_params(plan.learning_rate);
        let foreground_pixels = engine::update_and_classify(&mut self.store, frame_in, frame_out, &params)?;
        log::trace!(
            "frame {}: learning rate {:.5}, {} foreground pixels",
            plan.frame_index,
            plan.learning_rate,
            foreground_pixels
        );

        Ok(FrameStats {
            frame_index: plan.frame_index,
            learning_rate: plan.learning_rate,
            reset: plan.reset,
            foreground_pixels,
        })
    }

    /// Like `step`, allocating the output mask.
    pub fn apply(&mut self, frame_in: &[u8], learning_rate: f64) -> Result<Vec<u8>> {
        let mut mask = vec![0u8; self.config.pixel_count()];
        self.step(frame_in, &mut mask, learning_rate)?;
        Ok(mask)
    }

    /// Runs one grayscale image through the subtractor and returns its mask as an image.
    pub fn apply_luma(&mut self, frame: &GrayImage, learning_rate: f64) -> Result<GrayImage> {
        let expected = (self.config.image_width, self.config.image_height);
        if frame.dimensions() != expected {
            return Err(VisionError::DimensionMismatch {
                expected,
                actual: frame.dimensions(),
            });
        }
        let mut mask = GrayImage::new(expected.0, expected.1);
        self.step(frame.as_raw(), &mut mask, learning_rate)?;
        Ok(mask)
    }

    /// Wipes the model; the next frame starts a fresh warm-up.
    pub fn reset(&mut self) {
        self.lifecycle.invalidate();
        self.store.reset();
    }

    /// The ranked mixture components of the pixel at (`x`, `y`), or `None`
    /// outside the frame.
    pub fn model_at(&self, x: u32, y: u32) -> Option<&[MixtureComponent]> {
        self.store.at(x, y)
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// The current background estimate, one byte per pixel.
    pub fn background(&self) -> Vec<u8> {
        engine::estimate_background(&self.store)
    }

    pub fn background_image(&self) -> GrayImage {
        let mut image = GrayImage::new(self.config.image_width, self.config.image_height);
        image.copy_from_slice(&self.background());
        image
    }
}
