//! PNG encoding for RGBA image data.
//!
//! Supports two encoding modes:
//! - **Indexed PNG (color type 3)**: Used when image has ≤256 unique colors.
//!   Produces smaller files and encodes faster.
//! - **RGBA PNG (color type 6)**: Fallback for images with >256 colors.
//!
//! Both modes honour a zlib compression level (0-9) and optional Adam7
//! interlacing. Use [`encode_png`] for automatic mode selection.

use rayon::prelude::*;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use map_common::MapError;

/// PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Maximum colors for indexed PNG (PNG8)
const MAX_PALETTE_SIZE: usize = 256;

/// Minimum pixels to benefit from parallel palette extraction
const PARALLEL_THRESHOLD: usize = 4096; // 64x64 or larger

/// Largest dimension the PNG format allows.
const MAX_DIMENSION: usize = (1 << 31) - 1;

/// Adam7 passes as (x start, y start, x step, y step).
const ADAM7: [(usize, usize, usize, usize); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("pixel buffer holds {actual} bytes, expected {expected} for RGBA")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("compression level {0} is outside 0-9")]
    InvalidCompressionLevel(u8),

    #[error("IDAT compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("{codec} encoder failed: {message}")]
    Codec { codec: &'static str, message: String },
}

impl From<EncodeError> for MapError {
    fn from(err: EncodeError) -> Self {
        MapError::Encode(err.to_string())
    }
}

/// Encoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngOptions {
    /// zlib level, 0 (store) to 9 (best).
    pub compression_level: u8,
    /// Adam7 interlacing.
    pub interlaced: bool,
    /// Emit an indexed image when the colors fit in a palette.
    pub auto_palette: bool,
}

impl Default for PngOptions {
    fn default() -> Self {
        Self {
            compression_level: 6,
            interlaced: false,
            auto_palette: true,
        }
    }
}

impl PngOptions {
    pub fn fast() -> Self {
        Self {
            compression_level: 1,
            ..Self::default()
        }
    }

    pub fn with_compression(mut self, level: u8) -> Self {
        self.compression_level = level;
        self
    }

    pub fn interlaced(mut self, interlaced: bool) -> Self {
        self.interlaced = interlaced;
        self
    }
}

/// Check that `pixels` is a complete RGBA buffer for `width`x`height`.
pub fn check_rgba_buffer(pixels: &[u8], width: usize, height: usize) -> Result<(), EncodeError> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(EncodeError::InvalidDimensions { width, height });
    }
    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(4))
        .ok_or(EncodeError::InvalidDimensions { width, height })?;
    if pixels.len() != expected {
        return Err(EncodeError::BufferSizeMismatch {
            expected,
            actual: pixels.len(),
        });
    }
    Ok(())
}

/// Encode RGBA pixels, choosing indexed output when the image allows it.
pub fn encode_png(
    pixels: &[u8],
    width: usize,
    height: usize,
    options: &PngOptions,
) -> Result<Vec<u8>, EncodeError> {
    check_rgba_buffer(pixels, width, height)?;
    if options.compression_level > 9 {
        return Err(EncodeError::InvalidCompressionLevel(options.compression_level));
    }

    if options.auto_palette {
        let num_pixels = pixels.len() / 4;
        // Try to extract a palette (use parallel version for larger images)
        let palette_result = if num_pixels >= PARALLEL_THRESHOLD {
            extract_palette_parallel(pixels)
        } else {
            extract_palette_sequential(pixels)
        };
        if let Some((palette, indices)) = palette_result {
            return create_png_indexed(width, height, &palette, &indices, options);
        }
    }
    create_png_rgba(pixels, width, height, options)
}

/// Encode and write to `path`.
pub fn save_png(
    path: impl AsRef<Path>,
    pixels: &[u8],
    width: usize,
    height: usize,
    options: &PngOptions,
) -> Result<(), EncodeError> {
    let png = encode_png(pixels, width, height, options)?;
    std::fs::write(path, png)?;
    Ok(())
}

/// Pack RGBA bytes into a u32 for faster hashing and comparison
#[inline(always)]
fn pack_color(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | ((a as u32) << 24)
}

/// Unpack u32 back to RGBA tuple
#[inline(always)]
fn unpack_color(packed: u32) -> (u8, u8, u8, u8) {
    (
        packed as u8,
        (packed >> 8) as u8,
        (packed >> 16) as u8,
        (packed >> 24) as u8,
    )
}

/// Sequential palette extraction for small images.
fn extract_palette_sequential(pixels: &[u8]) -> Option<(Vec<(u8, u8, u8, u8)>, Vec<u8>)> {
    let mut color_to_index: HashMap<u32, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette: Vec<(u8, u8, u8, u8)> = Vec::with_capacity(MAX_PALETTE_SIZE);
    let mut indices: Vec<u8> = Vec::with_capacity(pixels.len() / 4);

    for chunk in pixels.chunks_exact(4) {
        let packed = pack_color(chunk[0], chunk[1], chunk[2], chunk[3]);

        let index = match color_to_index.get(&packed) {
            Some(&idx) => idx,
            None => {
                if palette.len() >= MAX_PALETTE_SIZE {
                    return None;
                }
                let idx = palette.len() as u8;
                palette.push((chunk[0], chunk[1], chunk[2], chunk[3]));
                color_to_index.insert(packed, idx);
                idx
            }
        };
        indices.push(index);
    }

    Some((palette, indices))
}

/// Parallel palette extraction for larger images.
///
/// Unique colors are gathered per chunk, merged, and then every pixel is
/// mapped to its palette index in a second parallel pass.
fn extract_palette_parallel(pixels: &[u8]) -> Option<(Vec<(u8, u8, u8, u8)>, Vec<u8>)> {
    let chunk_pixels = (pixels.len() / 4 / rayon::current_num_threads()).max(256);
    let chunk_size = chunk_pixels * 4;

    let chunk_colors: Vec<Option<Vec<u32>>> = pixels
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut local: HashMap<u32, ()> = HashMap::with_capacity(MAX_PALETTE_SIZE);
            for pixel in chunk.chunks_exact(4) {
                local.insert(pack_color(pixel[0], pixel[1], pixel[2], pixel[3]), ());
                if local.len() > MAX_PALETTE_SIZE {
                    return None;
                }
            }
            Some(local.into_keys().collect())
        })
        .collect();

    let mut global_colors: HashMap<u32, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette: Vec<(u8, u8, u8, u8)> = Vec::with_capacity(MAX_PALETTE_SIZE);
    for colors in chunk_colors {
        for packed in colors? {
            if !global_colors.contains_key(&packed) {
                if palette.len() >= MAX_PALETTE_SIZE {
                    return None;
                }
                global_colors.insert(packed, palette.len() as u8);
                palette.push(unpack_color(packed));
            }
        }
    }

    let mut indices = vec![0u8; pixels.len() / 4];
    indices
        .par_chunks_mut(chunk_pixels)
        .zip(pixels.par_chunks(chunk_size))
        .for_each(|(idx_chunk, px_chunk)| {
            for (idx, p) in idx_chunk.iter_mut().zip(px_chunk.chunks_exact(4)) {
                *idx = *global_colors
                    .get(&pack_color(p[0], p[1], p[2], p[3]))
                    .unwrap_or(&0);
            }
        });

    Some((palette, indices))
}

/// Create an indexed PNG (color type 3) from palette and indices.
fn create_png_indexed(
    width: usize,
    height: usize,
    palette: &[(u8, u8, u8, u8)],
    indices: &[u8],
    options: &PngOptions,
) -> Result<Vec<u8>, EncodeError> {
    let mut png = Vec::new();
    png.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut png, b"IHDR", &ihdr(width, height, 3, options.interlaced));

    let plte_data: Vec<u8> = palette.iter().flat_map(|&(r, g, b, _)| [r, g, b]).collect();
    write_chunk(&mut png, b"PLTE", &plte_data);

    // tRNS chunk (transparency) - only if any color has alpha < 255
    if palette.iter().any(|(_, _, _, a)| *a < 255) {
        let trns_data: Vec<u8> = palette.iter().map(|(_, _, _, a)| *a).collect();
        write_chunk(&mut png, b"tRNS", &trns_data);
    }

    let idat_data = deflate_scanlines(indices, width, height, 1, options)?;
    write_chunk(&mut png, b"IDAT", &idat_data);
    write_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

/// Create a PNG image from RGBA pixel data (color type 6).
fn create_png_rgba(
    pixels: &[u8],
    width: usize,
    height: usize,
    options: &PngOptions,
) -> Result<Vec<u8>, EncodeError> {
    let mut png = Vec::new();
    png.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut png, b"IHDR", &ihdr(width, height, 6, options.interlaced));

    let idat_data = deflate_scanlines(pixels, width, height, 4, options)?;
    write_chunk(&mut png, b"IDAT", &idat_data);
    write_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

fn ihdr(width: usize, height: usize, color_type: u8, interlaced: bool) -> Vec<u8> {
    let mut data = Vec::with_capacity(13);
    data.extend_from_slice(&(width as u32).to_be_bytes());
    data.extend_from_slice(&(height as u32).to_be_bytes());
    data.push(8); // bit depth
    data.push(color_type);
    data.push(0); // compression method
    data.push(0); // filter method
    data.push(interlaced as u8);
    data
}

/// Write a PNG chunk
fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    png.extend_from_slice(&hasher.finalize().to_be_bytes());
}

/// Lay out scanlines (filter type 0) and deflate them for the IDAT chunk.
///
/// `bpp` is bytes per pixel in `data`.
fn deflate_scanlines(
    data: &[u8],
    width: usize,
    height: usize,
    bpp: usize,
    options: &PngOptions,
) -> Result<Vec<u8>, EncodeError> {
    let stride = width * bpp;
    let mut raw = Vec::with_capacity(height * (1 + stride));

    if options.interlaced {
        for &(x0, y0, dx, dy) in &ADAM7 {
            if x0 >= width || y0 >= height {
                continue;
            }
            for y in (y0..height).step_by(dy) {
                raw.push(0); // filter type: none
                let row = &data[y * stride..(y + 1) * stride];
                for x in (x0..width).step_by(dx) {
                    raw.extend_from_slice(&row[x * bpp..(x + 1) * bpp]);
                }
            }
        }
    } else {
        for row in data.chunks_exact(stride).take(height) {
            raw.push(0); // filter type: none
            raw.extend_from_slice(row);
        }
    }

    let level = flate2::Compression::new(options.compression_level as u32);
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), level);
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}
