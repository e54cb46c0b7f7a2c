// THEORY:
// Every pixel's mixture is independent of its neighbours, so a frame can be cut
// into horizontal bands of rows and each band learned on its own. The
// `ParallelPipeline` spawns one tokio actor per band; each actor exclusively owns
// a band-sized `ModelStore`, so no locking is needed anywhere.
//
// Key architectural principles:
// 1.  **Ownership instead of sharing**: Bands never touch each other's models. The
//     only shared data is the read-only input frame, handed out as an `Arc`.
// 2.  **One Lifecycle**: A single `Lifecycle` decides resets and the learning-rate
//     schedule for all bands, so every band sees exactly the same policy as the
//     sequential `BackgroundSubtractor` would.
// 3.  **Frame Barrier**: `step` awaits every band's reply before returning. The next
//     frame can never overtake the current one, and a reset travels down the same
//     ordered channel as the updates.

use crate::core_modules::engine::{self, MixtureParams};
use crate::core_modules::model_store::ModelStore;
use crate::error::{Result, VisionError};
use crate::pipeline::{FramePlan, FrameStats, Lifecycle, SubtractorConfig};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const BAND_QUEUE_DEPTH: usize = 4;

/// Message type for band actors.
enum BandMessage {
    Update {
        frame: Arc<Vec<u8>>,
        params: MixtureParams,
        reply: oneshot::Sender<Result<BandOutput>>,
    },
    Background(oneshot::Sender<Vec<u8>>),
    Reset,
    Shutdown,
}

struct BandOutput {
    mask: Vec<u8>,
    foreground_pixels: usize,
}

/// A contiguous range of image rows owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub first_row: u32,
    pub rows: u32,
}

impl Band {
    /// Byte range of this band inside a row-major frame of the given width.
    pub fn byte_range(&self, width: u32) -> std::ops::Range<usize> {
        let start = self.first_row as usize * width as usize;
        start..start + self.rows as usize * width as usize
    }
}

/// Splits `height` rows into at most `bands` non-empty bands of near-equal size.
pub fn split_rows(height: u32, bands: usize) -> Vec<Band> {
    let count = bands.clamp(1, height.max(1) as usize) as u32;
    let base = height / count;
    let extra = height % count;

    let mut first_row = 0;
    (0..count)
        .map(|i| {
            let rows = base + u32::from(i < extra);
            let band = Band { first_row, rows };
            first_row += rows;
            band
        })
        .collect()
}

/// Background subtraction with the frame split across tokio band actors.
pub struct ParallelPipeline {
    config: SubtractorConfig,
    lifecycle: Lifecycle,
    bands: Vec<Band>,
    band_actors: Vec<mpsc::Sender<BandMessage>>,
    workers: Vec<JoinHandle<()>>,
    /// Input frame shared with the bands, reused from frame to frame.
    frame: Arc<Vec<u8>>,
}

impl ParallelPipeline {
    /// Creates a pipeline with one band per CPU. Must be called inside a tokio runtime.
    pub fn new(config: SubtractorConfig) -> Result<Self> {
        Self::with_bands(config, num_cpus::get())
    }

    pub fn with_bands(config: SubtractorConfig, band_count: usize) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VisionError::WorkerPool(format!("no tokio runtime: {}", e)))?;

        let bands = split_rows(config.image_height, band_count);
        let mut band_actors = Vec::with_capacity(bands.len());
        let mut workers = Vec::with_capacity(bands.len());

        for band in &bands {
            let (tx, rx) = mpsc::channel::<BandMessage>(BAND_QUEUE_DEPTH);
            workers.push(runtime.spawn(run_band(*band, config.image_width, rx)));
            band_actors.push(tx);
        }
        log::debug!(
            "spawned {} band workers for {}x{} frames",
            bands.len(),
            config.image_width,
            config.image_height
        );

        Ok(Self {
            lifecycle: Lifecycle::new(config.history),
            frame: Arc::new(Vec::with_capacity(config.pixel_count())),
            config,
            bands,
            band_actors,
            workers,
        })
    }

    pub fn config(&self) -> &SubtractorConfig {
        &self.config
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn frame_count(&self) -> u64 {
        self.lifecycle.frame_count()
    }

    /// Classifies `frame_in` into `frame_out` across all bands, with the same
    /// learning-rate rules as `BackgroundSubtractor::step`.
    ///
    /// If a band fails, the bands that already learned the frame are out of step
    /// with the rest, so the next frame restarts the sequence with a reset.
    pub async fn step(&mut self, frame_in: &[u8], frame_out: &mut [u8], learning_rate: f64) -> Result<FrameStats> {
        let pixel_count = self.config.pixel_count();
        VisionError::check_len("input", pixel_count, frame_in.len())?;
        VisionError::check_len("output", pixel_count, frame_out.len())?;

        let plan = self.lifecycle.begin_frame(learning_rate)?;
        match self.run_frame(frame_in, frame_out, plan).await {
            Ok(foreground_pixels) => Ok(FrameStats {
                frame_index: plan.frame_index,
                learning_rate: plan.learning_rate,
                reset: plan.reset,
                foreground_pixels,
            }),
            Err(e) => {
                self.lifecycle.invalidate();
                Err(e)
            }
        }
    }

    async fn run_frame(&mut self, frame_in: &[u8], frame_out: &mut [u8], plan: FramePlan) -> Result<usize> {
        if plan.reset {
            log::debug!("resetting {} band models", self.bands.len());
            self.broadcast_reset().await?;
        }

        // Bands release their handle before replying, so after the previous
        // frame this buffer is unshared and gets overwritten in place.
        let shared = Arc::make_mut(&mut self.frame);
        shared.clear();
        shared.extend_from_slice(frame_in);

        let params = self.config.mixture_params(plan.learning_rate);
        let mut replies = Vec::with_capacity(self.band_actors.len());
        for (index, tx) in self.band_actors.iter().enumerate() {
            let (reply, result) = oneshot::channel();
            let message = BandMessage::Update {
                frame: Arc::clone(&self.frame),
                params,
                reply,
            };
            tx.send(message).await.map_err(|_| band_gone(index))?;
            replies.push(result);
        }

        let mut foreground_pixels = 0;
        for (index, (band, reply)) in self.bands.iter().zip(join_all(replies).await).enumerate() {
            let output = reply.map_err(|_| band_gone(index))??;
            frame_out[band.byte_range(self.config.image_width)].copy_from_slice(&output.mask);
            foreground_pixels += output.foreground_pixels;
        }
        Ok(foreground_pixels)
    }

    /// The current background estimate, stitched together from every band.
    pub async fn background(&self) -> Result<Vec<u8>> {
        let mut replies = Vec::with_capacity(self.band_actors.len());
        for (index, tx) in self.band_actors.iter().enumerate() {
            let (reply, result) = oneshot::channel();
            tx.send(BandMessage::Background(reply)).await.map_err(|_| band_gone(index))?;
            replies.push(result);
        }

        let mut background = vec![0u8; self.config.pixel_count()];
        for (index, (band, reply)) in self.bands.iter().zip(join_all(replies).await).enumerate() {
            let estimate = reply.map_err(|_| band_gone(index))?;
            background[band.byte_range(self.config.image_width)].copy_from_slice(&estimate);
        }
        Ok(background)
    }

    /// Like `step`, allocating the output mask.
    pub async fn process_frame(&mut self, frame_in: &[u8], learning_rate: f64) -> Result<Vec<u8>> {
        let mut mask = vec![0u8; self.config.pixel_count()];
        self.step(frame_in, &mut mask, learning_rate).await?;
        Ok(mask)
    }

    /// Wipes every band's model; the next frame starts a fresh warm-up.
    pub async fn reset(&mut self) -> Result<()> {
        self.lifecycle.invalidate();
        self.broadcast_reset().await
    }

    async fn broadcast_reset(&self) -> Result<()> {
        for (index, tx) in self.band_actors.iter().enumerate() {
            tx.send(BandMessage::Reset).await.map_err(|_| band_gone(index))?;
        }
        Ok(())
    }

    /// Stops all band actors and waits for them to exit.
    pub async fn shutdown(mut self) {
        for tx in &self.band_actors {
            let _ = tx.send(BandMessage::Shutdown).await;
        }
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}

impl Drop for ParallelPipeline {
    fn drop(&mut self) {
        for tx in &self.band_actors {
            let _ = tx.try_send(BandMessage::Shutdown);
        }
    }
}

fn band_gone(index: usize) -> VisionError {
    log::warn!("band worker {} stopped responding", index);
    VisionError::WorkerPool(format!("band {} is no longer running", index))
}

/// Actor loop owning the model store for one band.
async fn run_band(band: Band, width: u32, mut inbox: mpsc::Receiver<BandMessage>) {
    let mut store = ModelStore::new(width, band.rows);
    let range = band.byte_range(width);

    while let Some(message) = inbox.recv().await {
        match message {
            BandMessage::Update { frame, params, reply } => {
                let mut mask = vec![0u8; range.len()];
                let result = engine::update_and_classify(&mut store, &frame[range.clone()], &mut mask, &params)
                    .map(|foreground_pixels| BandOutput { mask, foreground_pixels });
                drop(frame);
                let _ = reply.send(result);
            }
            BandMessage::Background(reply) => {
                let _ = reply.send(engine::estimate_background(&store));
            }
            BandMessage::Reset => store.reset(),
            BandMessage::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::BackgroundSubtractor;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// A static textured scene with a bright square drifting across it.
    fn scene(width: u32, height: u32, frame: u32, rng: &mut StdRng) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let inside = x.abs_diff(frame % width) <= 1 && y.abs_diff(frame % height) <= 1;
                let base = if inside { 240 } else { (40 + x * 13 + y * 7) as u8 };
                pixels.push(base.saturating_add(rng.random_range(0..4)));
            }
        }
        pixels
    }

    #[test]
    fn rows_split_evenly() {
        assert_eq!(
            split_rows(7, 3),
            vec![
                Band { first_row: 0, rows: 3 },
                Band { first_row: 3, rows: 2 },
                Band { first_row: 5, rows: 2 },
            ]
        );
        assert_eq!(split_rows(2, 8).len(), 2);
        assert_eq!(split_rows(5, 0), vec![Band { first_row: 0, rows: 5 }]);
        assert_eq!(Band { first_row: 3, rows: 2 }.byte_range(5), 15..25);
    }

    #[test]
    fn requires_a_runtime() {
        let err = ParallelPipeline::new(SubtractorConfig::new(4, 4)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn matches_sequential_subtractor() {
        let config = SubtractorConfig::new(5, 7);
        let mut parallel = ParallelPipeline::with_bands(config.clone(), 3).unwrap();
        let mut sequential = BackgroundSubtractor::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        for n in 0..80u32 {
            let frame = scene(5, 7, n, &mut rng);
            let learning_rate = match n {
                40 => 1.0,
                60..=62 => 0.0,
                _ => -1.0,
            };
            let mut expected = vec![0u8; frame.len()];
            let mut actual = vec![0u8; frame.len()];
            let expected_stats = sequential.step(&frame, &mut expected, learning_rate).unwrap();
            let actual_stats = parallel.step(&frame, &mut actual, learning_rate).await.unwrap();

            assert_eq!(actual, expected, "frame {} differs", n);
            assert_eq!(actual_stats, expected_stats);
        }
        assert_eq!(parallel.frame_count(), sequential.frame_count());
        assert_eq!(parallel.background().await.unwrap(), sequential.background());
        parallel.shutdown().await;
    }

    #[tokio::test]
    async fn input_buffer_is_reused_between_frames() {
        let mut pipeline = ParallelPipeline::with_bands(SubtractorConfig::new(4, 6), 3).unwrap();
        pipeline.process_frame(&[60; 24], -1.0).await.unwrap();
        let buffer = pipeline.frame.as_ptr();

        for value in [61u8, 62, 63] {
            pipeline.process_frame(&[value; 24], -1.0).await.unwrap();
            assert_eq!(Arc::strong_count(&pipeline.frame), 1);
            assert_eq!(pipeline.frame.as_ptr(), buffer);
            assert_eq!(pipeline.frame.as_slice(), &[value; 24]);
        }
    }

    #[tokio::test]
    async fn failed_band_forces_reset_on_next_frame() {
        let mut pipeline = ParallelPipeline::with_bands(SubtractorConfig::new(4, 6), 3).unwrap();
        for _ in 0..5 {
            pipeline.process_frame(&[90; 24], -1.0).await.unwrap();
        }
        assert_eq!(pipeline.frame_count(), 5);

        let worker = pipeline.workers.remove(2);
        worker.abort();
        assert!(worker.await.unwrap_err().is_cancelled());

        let err = pipeline.process_frame(&[90; 24], -1.0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(pipeline.frame_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reset_reaches_every_band() {
        let mut pipeline = ParallelPipeline::new(SubtractorConfig::new(6, 9)).unwrap();
        let background = vec![80u8; 54];
        for _ in 0..20 {
            let mask = pipeline.process_frame(&background, -1.0).await.unwrap();
            assert!(mask.iter().all(|&v| v == 0));
        }

        pipeline.reset().await.unwrap();
        assert_eq!(pipeline.frame_count(), 0);

        // After the reset the first frame is learned from scratch, so a new
        // brightness level is background everywhere rather than foreground.
        let relit = vec![200u8; 54];
        let mask = pipeline.process_frame(&relit, -1.0).await.unwrap();
        assert!(mask.iter().all(|&v| v == 0));
        assert_eq!(pipeline.frame_count(), 1);
    }

    #[tokio::test]
    async fn wrong_frame_size_is_rejected() {
        let mut pipeline = ParallelPipeline::with_bands(SubtractorConfig::new(4, 4), 2).unwrap();
        let err = pipeline.process_frame(&[0; 15], -1.0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(pipeline.frame_count(), 0);
    }
}
