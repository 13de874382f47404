use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Keypoint, NUM_KEYPOINTS, NormalizedImage};

pub const INPUT_SIZE: u32 = 224;

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Scales the image to fit a `target_size` square, pads it with black, and
/// returns a (1, H, W, 3) tensor in [0, 1].
pub fn prepare_letterbox(
    image: &NormalizedImage,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    let expected_len = (image.width as usize)
        .saturating_mul(image.height as usize)
        .saturating_mul(4);
    if image.rgba.len() != expected_len {
        return Err(anyhow!(
            "image buffer size mismatch: got {}, expected {}",
            image.rgba.len(),
            expected_len
        ));
    }

    let scale = target_size as f32 / (image.width.max(image.height) as f32);
    let new_w = ((image.width as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((image.height as f32 * scale).round() as u32).clamp(1, target_size);

    let src_image = fir::images::Image::from_vec_u8(
        image.width,
        image.height,
        image.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 4];
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: image.width,
        orig_h: image.height,
    };

    Ok((input, letterbox))
}

pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    if flat.len() < NUM_KEYPOINTS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_KEYPOINTS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_KEYPOINTS)
        .map(|c| [c[0], c[1], c[2]])
        .collect())
}

/// Maps model-space keypoints back to coordinates normalized to the source
/// image. Depth is scaled like x.
pub fn unletterbox(landmarks: &[[f32; 3]], letterbox: &LetterboxInfo) -> Vec<Keypoint> {
    let w = letterbox.orig_w.max(1) as f32;
    let h = letterbox.orig_h.max(1) as f32;
    landmarks
        .iter()
        .map(|&[x, y, z]| {
            let px = (x - letterbox.pad_x) / letterbox.scale;
            let py = (y - letterbox.pad_y) / letterbox.scale;
            Keypoint::new(
                (px / w).clamp(0.0, 1.0),
                (py / h).clamp(0.0, 1.0),
                z / letterbox.scale / w,
            )
        })
        .collect()
}
