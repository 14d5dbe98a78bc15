// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Image preparation and attachment persistence
//!
//! Backends accept inline images only up to a few megabytes, and base64
//! inflates payloads by a third, so every image is recompressed before
//! transmission regardless of its original format.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};

use crate::error::{Result, SwitchboardError};
use crate::llm::message::ImageData;

/// Longest image side sent inline; larger images are scaled down
const MAX_INLINE_DIMENSION: u32 = 1568;

/// JPEG quality for recompressed payloads
const JPEG_QUALITY: u8 = 75;

/// Lossy recompression bounding payload size before base64 inflation.
///
/// Alpha is flattened onto white since JPEG has no transparency.
pub fn compress_image(bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| SwitchboardError::AttachmentDecode(e.to_string()))?;

    let rgba = decoded.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }

    let flattened = DynamicImage::ImageRgba8(flattened);
    let resized = if flattened.width() > MAX_INLINE_DIMENSION
        || flattened.height() > MAX_INLINE_DIMENSION
    {
        flattened
            .resize(MAX_INLINE_DIMENSION, MAX_INLINE_DIMENSION, FilterType::Triangle)
            .to_rgb8()
    } else {
        flattened.to_rgb8()
    };

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder
        .encode_image(&resized)
        .map_err(|e| SwitchboardError::AttachmentDecode(e.to_string()))?;
    Ok(out)
}

/// Read an image file and prepare it for inline transmission.
///
/// An unreadable path is `InvalidInput`; a file that reads but does not
/// decode is `AttachmentDecode` so the caller can drop it with a warning.
pub fn load_image(path: &Path) -> Result<ImageData> {
    let bytes = std::fs::read(path).map_err(|e| {
        SwitchboardError::InvalidInput(format!(
            "cannot read image '{}': {e}",
            path.display()
        ))
    })?;

    let compressed = compress_image(&bytes)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());

    Ok(ImageData {
        name,
        media_type: "image/jpeg".to_string(),
        data: BASE64.encode(compressed),
    })
}

/// Write attachment bytes under the kind-segregated storage root,
/// returning the final path.
pub fn persist_file(root: &Path, dir_name: &str, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let dir = root.join(dir_name);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}
