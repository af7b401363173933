//! Multi-format image encoding of RGBA buffers.

use std::io::Cursor;

use map_common::ImageFormat;

use crate::png::{check_rgba_buffer, encode_png, EncodeError, PngOptions};

/// Encode `pixels` in the requested format.
///
/// `quality` (1-100) applies to JPEG and WebP; WebP at 100 is lossless.
pub fn encode_image(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: ImageFormat,
    quality: u8,
    png: &PngOptions,
) -> Result<Vec<u8>, EncodeError> {
    match format {
        ImageFormat::Png => encode_png(pixels, width as usize, height as usize, png),
        ImageFormat::Jpeg => encode_jpeg(pixels, width, height, quality),
        ImageFormat::Webp => encode_webp(pixels, width, height, quality),
    }
}

/// JPEG has no alpha channel, so pixels are composited onto white first.
fn encode_jpeg(pixels: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, EncodeError> {
    check_rgba_buffer(pixels, width as usize, height as usize)?;
    if width > u16::MAX as u32 || height > u16::MAX as u32 {
        return Err(EncodeError::InvalidDimensions {
            width: width as usize,
            height: height as usize,
        });
    }

    let mut rgb = Vec::with_capacity(pixels.len() / 4 * 3);
    for px in pixels.chunks_exact(4) {
        let alpha = px[3] as f32 / 255.0;
        for &c in &px[..3] {
            rgb.push((c as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8);
        }
    }

    let mut jpeg_data = Vec::new();
    let mut cursor = Cursor::new(&mut jpeg_data);
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality.clamp(1, 100));
    encoder
        .encode(&rgb, width, height, image::ColorType::Rgb8)
        .map_err(|e| EncodeError::Codec {
            codec: "jpeg",
            message: e.to_string(),
        })?;
    Ok(jpeg_data)
}

fn encode_webp(pixels: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, EncodeError> {
    check_rgba_buffer(pixels, width as usize, height as usize)?;
    // libwebp caps each side at 16383 pixels
    if width > 16383 || height > 16383 {
        return Err(EncodeError::Codec {
            codec: "webp",
            message: format!("{}x{} exceeds the 16383 pixel limit", width, height),
        });
    }

    let encoder = webp::Encoder::from_rgba(pixels, width, height);
    let webp_data = if quality >= 100 {
        encoder.encode_lossless()
    } else {
        encoder.encode(quality as f32)
    };
    if webp_data.is_empty() {
        return Err(EncodeError::Codec {
            codec: "webp",
            message: "encoder produced no output".to_string(),
        });
    }
    Ok(webp_data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_signature_and_size() {
        let pixels = test_utils::create_test_rgba_pixels(32, 16);
        let jpeg = encode_image(&pixels, 32, 16, ImageFormat::Jpeg, 80, &PngOptions::default())
            .unwrap();
        assert_eq!(&jpeg[0..3], &[0xFF, 0xD8, 0xFF]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn test_jpeg_flattens_transparency_onto_white() {
        let pixels = vec![0u8; 8 * 8 * 4];
        let jpeg = encode_image(&pixels, 8, 8, ImageFormat::Jpeg, 95, &PngOptions::default())
            .unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert!(decoded.pixels().all(|p| p.0.iter().all(|&c| c > 245)));
    }

    #[test]
    fn test_webp_signature() {
        let pixels = test_utils::create_test_rgba_pixels(16, 16);
        let webp = encode_image(&pixels, 16, 16, ImageFormat::Webp, 75, &PngOptions::default())
            .unwrap();
        assert_eq!(&webp[0..4], b"RIFF");
        assert_eq!(&webp[8..12], b"WEBP");
    }

    #[test]
    fn test_size_mismatch_fails_for_every_format() {
        for format in ImageFormat::ALL {
            let err = encode_image(&[0u8; 10], 2, 2, format, 90, &PngOptions::default())
                .unwrap_err();
            assert!(matches!(err, EncodeError::BufferSizeMismatch { .. }), "{:?}", format);
        }
    }
}
