// THEORY:
// This file is the entry point for the `mog_vision` library crate. It exposes a
// per-pixel Gaussian-mixture background model for fixed-resolution grayscale
// video: feed it frames, get back a mask where 255 marks foreground and 0 marks
// background.
//
// The layering, from the bottom up:
// - `core_modules::mixture` and `core_modules::model_store` hold the data.
// - `core_modules::engine` learns from a frame and classifies it.
// - `pipeline` owns the frame counter, reset rules and warm-up schedule
//   (`BackgroundSubtractor`).
// - `parallel_pipeline` runs the same thing split across tokio band actors.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::engine::{BACKGROUND, FOREGROUND, MixtureParams, update_and_classify};
pub use core_modules::mixture::{MIXTURES, MixtureComponent};
pub use core_modules::model_store::ModelStore;
pub use error::{ErrorKind, Result, VisionError};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{BackgroundSubtractor, FrameStats, SubtractorConfig};
