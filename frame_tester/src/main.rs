mod image_helper;

use anyhow::{Context, bail};
use flexi_logger::{Logger, LoggerHandle};
use mog_vision::{BackgroundSubtractor, FrameStats, ParallelPipeline, SubtractorConfig};
use std::env;
use std::path::PathBuf;

const USAGE: &str =
    "Usage: frame_tester <input_dir> <output_dir> [--parallel] [--learning-rate <rate>]";

struct Options {
    input_dir: PathBuf,
    output_dir: PathBuf,
    parallel: bool,
    /// Negative selects the warm-up schedule.
    learning_rate: f64,
}

fn parse_args(args: &[String]) -> anyhow::Result<Option<Options>> {
    let mut positional = Vec::new();
    let mut parallel = false;
    let mut learning_rate = -1.0;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--parallel" => parallel = true,
            "--learning-rate" => {
                let value = iter.next().context("--learning-rate needs a value")?;
                learning_rate = value
                    .parse()
                    .with_context(|| format!("invalid learning rate {:?}", value))?;
            }
            "-h" | "--help" => return Ok(None),
            other if other.starts_with("--") => bail!("unknown option {}", other),
            other => positional.push(PathBuf::from(other)),
        }
    }

    match <[PathBuf; 2]>::try_from(positional) {
        Ok([input_dir, output_dir]) => Ok(Some(Options {
            input_dir,
            output_dir,
            parallel,
            learning_rate,
        })),
        Err(_) => Ok(None),
    }
}

fn setup_logging(base_level: &str) -> anyhow::Result<LoggerHandle> {
    let handle = Logger::try_with_env_or_str(base_level)?
        .log_to_stderr()
        .start()?;
    Ok(handle)
}

enum Subtractor {
    Sequential(BackgroundSubtractor),
    Parallel(ParallelPipeline),
}

impl Subtractor {
    async fn step(&mut self, frame: &[u8], mask: &mut [u8], learning_rate: f64) -> mog_vision::Result<FrameStats> {
        match self {
            Subtractor::Sequential(subtractor) => subtractor.step(frame, mask, learning_rate),
            Subtractor::Parallel(pipeline) => pipeline.step(frame, mask, learning_rate).await,
        }
    }

    async fn background(&self) -> mog_vision::Result<Vec<u8>> {
        match self {
            Subtractor::Sequential(subtractor) => Ok(subtractor.background()),
            Subtractor::Parallel(pipeline) => pipeline.background().await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _logger = setup_logging("info")?;

    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(options) = parse_args(&args)? else {
        println!("{}", USAGE);
        return Ok(());
    };

    let frames = image_helper::list_frames(&options.input_dir)?;
    let Some(first) = frames.first() else {
        bail!("no image frames found in {}", options.input_dir.display());
    };
    std::fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("creating {}", options.output_dir.display()))?;

    // --- 2. Subtractor Initialization ---
    let (width, height) = image_helper::load_luma(first)?.dimensions();
    let config = SubtractorConfig::new(width, height);
    let mut subtractor = if options.parallel {
        Subtractor::Parallel(ParallelPipeline::new(config.clone())?)
    } else {
        Subtractor::Sequential(BackgroundSubtractor::new(config.clone())?)
    };
    log::info!(
        "processing {} frames of {}x{} ({})",
        frames.len(),
        width,
        height,
        if options.parallel { "parallel" } else { "sequential" }
    );

    // --- 3. Main Processing Loop ---
    let mut mask = vec![0u8; config.pixel_count()];
    for (index, path) in frames.iter().enumerate() {
        let frame = image_helper::load_luma(path)?;
        if frame.dimensions() != (width, height) {
            bail!(
                "{} is {}x{}, expected {}x{}",
                path.display(),
                frame.width(),
                frame.height(),
                width,
                height
            );
        }

        let stats = subtractor.step(frame.as_raw(), &mut mask, options.learning_rate).await?;
        log::info!(
            "{}: frame {} rate {:.4} foreground {:.2}%",
            path.display(),
            stats.frame_index,
            stats.learning_rate,
            stats.foreground_ratio(config.pixel_count()) * 100.0
        );

        let mask_path = options.output_dir.join(format!("mask_{:05}.png", index));
        image_helper::save_mask(&mask_path, width, height, &mask)
            .with_context(|| format!("writing {}", mask_path.display()))?;
    }

    // --- 4. Final Background Estimate ---
    let background = subtractor.background().await?;
    let path = options.output_dir.join("background.png");
    image_helper::save_mask(&path, width, height, &background)
        .with_context(|| format!("writing {}", path.display()))?;
    log::info!("background estimate written to {}", path.display());

    if let Subtractor::Parallel(pipeline) = subtractor {
        pipeline.shutdown().await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_positional_and_flags() {
        let options = parse_args(&args(&["in", "out", "--parallel", "--learning-rate", "0.01"]))
            .unwrap()
            .unwrap();
        assert_eq!(options.input_dir, PathBuf::from("in"));
        assert_eq!(options.output_dir, PathBuf::from("out"));
        assert!(options.parallel);
        assert_eq!(options.learning_rate, 0.01);
    }

    #[test]
    fn defaults_to_warm_up_schedule() {
        let options = parse_args(&args(&["in", "out"])).unwrap().unwrap();
        assert!(!options.parallel);
        assert!(options.learning_rate < 0.0);
    }

    #[test]
    fn missing_paths_show_usage() {
        assert!(parse_args(&args(&["in"])).unwrap().is_none());
        assert!(parse_args(&args(&["--help"])).unwrap().is_none());
        assert!(parse_args(&args(&["in", "out", "--bogus"])).is_err());
        assert!(parse_args(&args(&["in", "out", "--learning-rate", "fast"])).is_err());
    }

    #[tokio::test]
    async fn both_modes_estimate_the_same_background() {
        let config = SubtractorConfig::new(3, 4);
        let mut modes = [
            Subtractor::Sequential(BackgroundSubtractor::new(config.clone()).unwrap()),
            Subtractor::Parallel(ParallelPipeline::with_bands(config.clone(), 2).unwrap()),
        ];
        let frame: Vec<u8> = (0..12).map(|i| i * 20).collect();
        let mut mask = vec![0u8; 12];

        for mode in modes.iter_mut() {
            for _ in 0..3 {
                mode.step(&frame, &mut mask, -1.0).await.unwrap();
            }
            assert_eq!(mode.background().await.unwrap(), frame);
        }
    }
}
