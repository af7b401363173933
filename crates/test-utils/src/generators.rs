//! Test data generators for pixel buffers and scratch databases.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tempfile::TempDir;

/// Creates RGBA pixel data with a smooth gradient (many unique colors).
///
/// Red follows x, green follows y, blue is constant and alpha opaque.
pub fn create_test_rgba_pixels(width: usize, height: usize) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            let r = ((x as f32 / width as f32) * 255.0) as u8;
            let g = ((y as f32 / height as f32) * 255.0) as u8;
            pixels.extend_from_slice(&[r, g, 128, 255]);
        }
    }
    pixels
}

/// Creates RGBA pixel data using at most `colors` distinct opaque colors.
///
/// Suitable for exercising indexed (palette) PNG output.
pub fn create_palette_pixels(width: usize, height: usize, colors: usize) -> Vec<u8> {
    let colors = colors.max(1);
    let mut pixels = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            let idx = (x / 4 + y / 4) % colors;
            let v = (idx * 37 % 256) as u8;
            pixels.extend_from_slice(&[v, 255 - v, (idx * 11 % 256) as u8, 255]);
        }
    }
    pixels
}

/// Creates fully random RGBA pixel data, reproducible from `seed`.
pub fn create_random_rgba_pixels(width: usize, height: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pixels = vec![0u8; width * height * 4];
    rng.fill(pixels.as_mut_slice());
    pixels
}

/// Random dimensions in `1..=max`, reproducible from `seed`.
pub fn random_dimensions(seed: u64, max: usize) -> Vec<(usize, usize)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..16)
        .map(|_| (rng.gen_range(1..=max), rng.gen_range(1..=max)))
        .collect()
}

/// Read one RGBA pixel from a row-major buffer.
pub fn pixel_at(pixels: &[u8], width: usize, x: usize, y: usize) -> [u8; 4] {
    let i = (y * width + x) * 4;
    [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
}

/// A scratch directory holding a database path that does not exist yet.
///
/// Keep the returned `TempDir` alive for as long as the path is used.
pub fn temp_database() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("spatial_test.db");
    (dir, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_rgba_pixels() {
        let pixels = create_test_rgba_pixels(8, 4);
        assert_eq!(pixels.len(), 8 * 4 * 4);
        assert_eq!(&pixels[0..4], &[0, 0, 128, 255]);
    }

    #[test]
    fn test_palette_pixels_respect_color_count() {
        let pixels = create_palette_pixels(64, 64, 5);
        let mut unique: Vec<&[u8]> = pixels.chunks_exact(4).collect();
        unique.sort();
        unique.dedup();
        assert!(unique.len() <= 5);
    }

    #[test]
    fn test_random_pixels_are_reproducible() {
        assert_eq!(
            create_random_rgba_pixels(16, 16, 7),
            create_random_rgba_pixels(16, 16, 7)
        );
        assert_ne!(
            create_random_rgba_pixels(16, 16, 7),
            create_random_rgba_pixels(16, 16, 8)
        );
    }

    #[test]
    fn test_temp_database_path_is_fresh() {
        let (dir, path) = temp_database();
        assert!(path.starts_with(dir.path()));
        assert!(!path.exists());
    }
}
