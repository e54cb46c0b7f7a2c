use anyhow::Context;
use image::{GrayImage, ImageEncoder};
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "pgm"];

/// Image files in `dir`, sorted by file name so numbered frames come out in order.
pub fn list_frames(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_frame && path.is_file() {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Loads any supported image and converts it to 8-bit grayscale.
pub fn load_luma(path: &Path) -> anyhow::Result<GrayImage> {
    let image = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    Ok(image.to_luma8())
}

/// Writes a single-channel buffer as a PNG.
pub fn save_mask(path: &Path, width: u32, height: u32, buffer: &[u8]) -> Result<(), image::error::ImageError> {
    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(output);

    encoder.write_image(buffer, width, height, image::ExtendedColorType::L8)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("frame_tester_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("Error creating scratch dir.");
        dir
    }

    #[test]
    fn saved_mask_loads_back_unchanged() {
        let dir = scratch_dir("mask");
        let (width, height) = (7u32, 3u32);
        let buffer: Vec<u8> = (0..width * height)
            .map(|i| if i % 3 == 0 { 255 } else { 0 })
            .collect();
        let path = dir.join("mask.png");

        save_mask(&path, width, height, &buffer).expect("Error Saving File.");
        let loaded = load_luma(&path).expect("Error Loading File.");

        assert_eq!(loaded.dimensions(), (width, height));
        assert_eq!(loaded.into_raw(), buffer);
    }

    #[test]
    fn frames_are_filtered_and_sorted() {
        let dir = scratch_dir("list");
        for name in ["frame_002.png", "frame_001.png", "frame_010.PNG"] {
            save_mask(&dir.join(name), 2, 2, &[0, 64, 128, 255]).expect("Error Saving File.");
        }
        std::fs::write(dir.join("notes.txt"), "not a frame").unwrap();

        let names: Vec<String> = list_frames(&dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_001.png", "frame_002.png", "frame_010.PNG"]);
    }
}
