use std::borrow::Cow;

use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuv_nv21_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::{
    error::DecodeError,
    types::{NormalizedImage, PixelFormat, Plane, RawFrame},
};

// Camera YUV is treated as full-range BT.601, the JFIF convention.
const YUV_RANGE: YuvRange = YuvRange::Full;
const YUV_MATRIX: YuvStandardMatrix = YuvStandardMatrix::Bt601;

/// Converts a raw sensor frame into an RGBA image the landmark model can use.
///
/// The source planes are only read; every conversion writes into freshly
/// allocated buffers. The output always has the frame's width and height.
pub fn normalize(frame: &RawFrame) -> Result<NormalizedImage, DecodeError> {
    if frame.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }

    let (width, height) = (frame.width, frame.height);
    let rgba = match frame.format {
        PixelFormat::Yuv420 => {
            let nv21 = repack_yuv420_to_nv21(frame)?;
            let y_len = width as usize * height as usize;
            let (y_plane, vu_plane) = nv21.split_at(y_len);
            nv21_to_rgba(y_plane, vu_plane, width, height)?
        }
        PixelFormat::Nv21 => {
            let (y_plane, vu_plane) = semi_planar(frame)?;
            nv21_to_rgba(&y_plane, &vu_plane, width, height)?
        }
        PixelFormat::Nv12 => {
            let (y_plane, uv_plane) = semi_planar(frame)?;
            nv12_to_rgba(&y_plane, &uv_plane, width, height)?
        }
        PixelFormat::Yuyv => {
            let data = packed_rows(frame, 0, yuyv_row_bytes(width) as usize, height as usize)?;
            yuyv_to_rgba(&data, width, height)?
        }
        PixelFormat::Mjpeg => mjpeg_to_rgba(&first_plane(frame)?.data, width, height)?,
        PixelFormat::Rgb => {
            let data = packed_rows(frame, 0, width as usize * 3, height as usize)?;
            rgb_like_to_rgba(&data, false)
        }
        PixelFormat::Bgr => {
            let data = packed_rows(frame, 0, width as usize * 3, height as usize)?;
            rgb_like_to_rgba(&data, true)
        }
        PixelFormat::Gray => {
            let data = packed_rows(frame, 0, width as usize, height as usize)?;
            gray_to_rgba(&data)
        }
        PixelFormat::Rgba => packed_rows(frame, 0, width as usize * 4, height as usize)?.into_owned(),
    };

    if rgba.is_empty() {
        return Err(DecodeError::ZeroBytes);
    }

    Ok(NormalizedImage {
        rgba,
        width,
        height,
        timestamp: frame.timestamp,
    })
}

fn chroma_dims(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

/// Each YUYV macropixel covers two columns, so odd widths carry a padded pair.
fn yuyv_row_bytes(width: u32) -> u32 {
    width.div_ceil(2) * 4
}

fn first_plane(frame: &RawFrame) -> Result<&Plane, DecodeError> {
    frame.planes.first().ok_or(DecodeError::PlaneCount {
        format: frame.format,
        expected: 1,
        got: 0,
    })
}

/// Rows of `row_bytes` from plane `index`, borrowed when the plane is already
/// tightly packed.
fn packed_rows(
    frame: &RawFrame,
    index: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<Cow<'_, [u8]>, DecodeError> {
    let plane = frame.planes.get(index).ok_or(DecodeError::PlaneCount {
        format: frame.format,
        expected: index + 1,
        got: frame.planes.len(),
    })?;
    let stride = plane.row_stride.max(row_bytes);
    let needed = stride * rows.saturating_sub(1) + row_bytes;
    if plane.data.len() < needed {
        return Err(DecodeError::PlaneTooSmall {
            format: frame.format,
            plane: index,
            got: plane.data.len(),
            expected: needed,
        });
    }

    if stride == row_bytes {
        return Ok(Cow::Borrowed(&plane.data[..row_bytes * rows]));
    }

    let mut out = Vec::with_capacity(row_bytes * rows);
    for row in 0..rows {
        let start = row * stride;
        out.extend_from_slice(&plane.data[start..start + row_bytes]);
    }
    Ok(Cow::Owned(out))
}

/// Luma and interleaved chroma for NV12/NV21, from either two planes or a
/// single contiguous buffer.
fn semi_planar(frame: &RawFrame) -> Result<(Cow<'_, [u8]>, Cow<'_, [u8]>), DecodeError> {
    let (width, height) = (frame.width as usize, frame.height as usize);
    let (chroma_w, chroma_h) = chroma_dims(frame.width, frame.height);
    let chroma_row = chroma_w * 2;

    if frame.planes.len() >= 2 {
        let y_plane = packed_rows(frame, 0, width, height)?;
        let uv_plane = packed_rows(frame, 1, chroma_row, chroma_h)?;
        return Ok((y_plane, uv_plane));
    }

    let plane = first_plane(frame)?;
    let y_len = width * height;
    let expected = y_len + chroma_row * chroma_h;
    if plane.data.len() < expected {
        return Err(DecodeError::PlaneTooSmall {
            format: frame.format,
            plane: 0,
            got: plane.data.len(),
            expected,
        });
    }
    Ok((
        Cow::Borrowed(&plane.data[..y_len]),
        Cow::Borrowed(&plane.data[y_len..expected]),
    ))
}

/// Copies three-plane YUV 4:2:0 into a single NV21 buffer (Y rows, then
/// interleaved V/U), honoring each plane's row and pixel stride.
pub fn repack_yuv420_to_nv21(frame: &RawFrame) -> Result<Vec<u8>, DecodeError> {
    if frame.planes.len() < 3 {
        return Err(DecodeError::PlaneCount {
            format: frame.format,
            expected: 3,
            got: frame.planes.len(),
        });
    }

    let (width, height) = (frame.width as usize, frame.height as usize);
    let (chroma_w, chroma_h) = chroma_dims(frame.width, frame.height);
    let y_rows = packed_rows(frame, 0, width, height)?;

    let mut nv21 = Vec::with_capacity(width * height + chroma_w * chroma_h * 2);
    nv21.extend_from_slice(&y_rows);

    let u = &frame.planes[1];
    let v = &frame.planes[2];
    for row in 0..chroma_h {
        for col in 0..chroma_w {
            let v_idx = row * v.row_stride + col * v.pixel_stride.max(1);
            let u_idx = row * u.row_stride + col * u.pixel_stride.max(1);
            let (Some(&v_value), Some(&u_value)) = (v.data.get(v_idx), u.data.get(u_idx)) else {
                let (plane, data, idx) = if v.data.get(v_idx).is_none() {
                    (2, &v.data, v_idx)
                } else {
                    (1, &u.data, u_idx)
                };
                return Err(DecodeError::PlaneTooSmall {
                    format: frame.format,
                    plane,
                    got: data.len(),
                    expected: idx + 1,
                });
            };
            nv21.push(v_value);
            nv21.push(u_value);
        }
    }

    Ok(nv21)
}

fn conversion_error(format: PixelFormat, err: impl std::fmt::Debug) -> DecodeError {
    DecodeError::Conversion {
        format,
        reason: format!("{err:?}"),
    }
}

fn nv21_to_rgba(
    y_plane: &[u8],
    vu_plane: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, DecodeError> {
    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    let image = YuvBiPlanarImage {
        y_plane,
        y_stride: width,
        uv_plane: vu_plane,
        uv_stride: width.div_ceil(2) * 2,
        width,
        height,
    };

    yuv_nv21_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YUV_RANGE,
        YUV_MATRIX,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| conversion_error(PixelFormat::Nv21, err))?;

    Ok(rgba)
}

fn nv12_to_rgba(
    y_plane: &[u8],
    uv_plane: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, DecodeError> {
    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    let image = YuvBiPlanarImage {
        y_plane,
        y_stride: width,
        uv_plane,
        uv_stride: width.div_ceil(2) * 2,
        width,
        height,
    };

    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YUV_RANGE,
        YUV_MATRIX,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| conversion_error(PixelFormat::Nv12, err))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, DecodeError> {
    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: yuyv_row_bytes(width),
        width,
        height,
    };

    yuyv422_to_rgba(&packed, &mut rgba, width * 4, YUV_RANGE, YUV_MATRIX)
        .map_err(|err| conversion_error(PixelFormat::Yuyv, err))?;

    Ok(rgba)
}

fn mjpeg_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, DecodeError> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| conversion_error(PixelFormat::Mjpeg, err))?;

    if let Some(info) = decoder.info() {
        let (got_width, got_height) = (u32::from(info.width), u32::from(info.height));
        if got_width != width || got_height != height {
            return Err(DecodeError::DimensionMismatch {
                width,
                height,
                got_width,
                got_height,
            });
        }
    }

    Ok(rgba)
}

fn rgb_like_to_rgba(data: &[u8], swap_rb: bool) -> Vec<u8> {
    let mut rgba = vec![0u8; data.len() / 3 * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if swap_rb {
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
            } else {
                dst[0] = src[0];
                dst[1] = src[1];
                dst[2] = src[2];
            }
            dst[3] = 255;
        });
    rgba
}

fn gray_to_rgba(data: &[u8]) -> Vec<u8> {
    let mut rgba = vec![0u8; data.len() * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_iter().copied())
        .for_each(|(dst, value)| {
            dst[0] = value;
            dst[1] = value;
            dst[2] = value;
            dst[3] = 255;
        });
    rgba
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::FrameId;

    fn frame(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane>) -> RawFrame {
        RawFrame::new(
            FrameId(1),
            width,
            height,
            format,
            planes,
            Duration::from_millis(33),
        )
    }

    #[test]
    fn bgr_swaps_channels_and_keeps_size() {
        let data = vec![10, 20, 30, 40, 50, 60];
        let image = normalize(&frame(2, 1, PixelFormat::Bgr, vec![Plane::packed(data, 6)])).unwrap();
        assert_eq!((image.width, image.height), (2, 1));
        assert_eq!(image.rgba, vec![30, 20, 10, 255, 60, 50, 40, 255]);
        assert_eq!(image.timestamp, Duration::from_millis(33));
    }

    #[test]
    fn padded_rows_are_compacted() {
        // 2x2 gray with 2 bytes of padding per row.
        let data = vec![1, 2, 0xee, 0xee, 3, 4, 0xee, 0xee];
        let image = normalize(&frame(2, 2, PixelFormat::Gray, vec![Plane::packed(data, 4)])).unwrap();
        let reds: Vec<u8> = image.rgba.chunks(4).map(|px| px[0]).collect();
        assert_eq!(reds, vec![1, 2, 3, 4]);
    }

    #[test]
    fn yuv420_repacks_into_vu_order() {
        // 4x2 luma, 2x1 chroma with pixel stride 2 (interleaved source buffers).
        let y = Plane::packed((0..8).collect(), 4);
        let u = Plane {
            data: vec![100, 0, 101, 0],
            row_stride: 4,
            pixel_stride: 2,
        };
        let v = Plane {
            data: vec![200, 0, 201, 0],
            row_stride: 4,
            pixel_stride: 2,
        };
        let raw = frame(4, 2, PixelFormat::Yuv420, vec![y, u, v]);
        let nv21 = repack_yuv420_to_nv21(&raw).unwrap();
        assert_eq!(nv21, vec![0, 1, 2, 3, 4, 5, 6, 7, 200, 100, 201, 101]);
        // Source planes are untouched.
        assert_eq!(raw.planes[1].data, vec![100, 0, 101, 0]);
    }

    #[test]
    fn yuv420_gray_decodes_to_gray() {
        let y = Plane::packed(vec![128; 16], 4);
        let u = Plane::packed(vec![128; 4], 2);
        let v = Plane::packed(vec![128; 4], 2);
        let image = normalize(&frame(4, 4, PixelFormat::Yuv420, vec![y, u, v])).unwrap();
        assert_eq!(image.rgba.len(), 4 * 4 * 4);
        for px in image.rgba.chunks(4) {
            assert!((px[0] as i32 - 128).abs() <= 2, "unexpected red {}", px[0]);
            assert_eq!(px[0], px[1]);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn short_chroma_plane_is_a_decode_error() {
        let y = Plane::packed(vec![0; 16], 4);
        let u = Plane::packed(vec![128; 4], 2);
        let v = Plane::packed(vec![128; 1], 2);
        let err = normalize(&frame(4, 4, PixelFormat::Yuv420, vec![y, u, v])).unwrap_err();
        assert!(matches!(err, DecodeError::PlaneTooSmall { plane: 2, .. }));
    }

    #[test]
    fn missing_planes_is_a_decode_error() {
        let y = Plane::packed(vec![0; 16], 4);
        let err = normalize(&frame(4, 4, PixelFormat::Yuv420, vec![y])).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::PlaneCount {
                expected: 3,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn garbage_jpeg_is_a_decode_error() {
        let raw = frame(
            4,
            4,
            PixelFormat::Mjpeg,
            vec![Plane::packed(vec![0x00, 0x11, 0x22], 3)],
        );
        assert!(normalize(&raw).is_err());
    }

    fn gray_2x2_with_chroma(first: u8, second: u8) -> (Vec<u8>, Vec<u8>) {
        (vec![128; 4], vec![first, second])
    }

    #[test]
    fn nv12_and_nv21_read_chroma_in_their_own_order() {
        // Strong blue: U = 255, V = 128.
        let (y, uv) = gray_2x2_with_chroma(255, 128);
        let (_, vu) = gray_2x2_with_chroma(128, 255);

        let nv12 = normalize(&frame(
            2,
            2,
            PixelFormat::Nv12,
            vec![Plane::packed(y.clone(), 2), Plane::packed(uv, 2)],
        ))
        .unwrap();
        let nv21 = normalize(&frame(
            2,
            2,
            PixelFormat::Nv21,
            vec![Plane::packed(y, 2), Plane::packed(vu, 2)],
        ))
        .unwrap();

        assert_eq!((nv12.width, nv12.height), (2, 2));
        assert_eq!(nv12.rgba, nv21.rgba);
        for px in nv12.rgba.chunks(4) {
            assert!(px[2] > px[0] + 100, "expected blue, got {px:?}");
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn single_plane_semi_planar_matches_two_planes() {
        for format in [PixelFormat::Nv12, PixelFormat::Nv21] {
            let (y, chroma) = gray_2x2_with_chroma(90, 200);
            let mut contiguous = y.clone();
            contiguous.extend_from_slice(&chroma);

            let split = normalize(&frame(
                2,
                2,
                format,
                vec![Plane::packed(y, 2), Plane::packed(chroma, 2)],
            ))
            .unwrap();
            let joined =
                normalize(&frame(2, 2, format, vec![Plane::packed(contiguous, 2)])).unwrap();
            assert_eq!(split.rgba, joined.rgba, "{format:?}");
        }
    }

    #[test]
    fn truncated_single_plane_nv21_is_a_decode_error() {
        let raw = frame(4, 4, PixelFormat::Nv21, vec![Plane::packed(vec![0; 18], 4)]);
        assert!(matches!(
            normalize(&raw),
            Err(DecodeError::PlaneTooSmall {
                plane: 0,
                expected: 24,
                ..
            })
        ));
    }

    #[test]
    fn yuyv_neutral_chroma_is_gray() {
        let data = vec![128, 128, 128, 128];
        let image = normalize(&frame(2, 1, PixelFormat::Yuyv, vec![Plane::packed(data, 4)])).unwrap();
        assert_eq!(image.rgba.len(), 2 * 4);
        for px in image.rgba.chunks(4) {
            assert!((px[0] as i32 - 128).abs() <= 2, "unexpected red {}", px[0]);
            assert_eq!(px[0], px[2]);
        }
    }

    #[test]
    fn yuyv_odd_widths_decode() {
        for (width, height) in [(1, 1), (3, 3), (5, 2)] {
            let row = yuyv_row_bytes(width) as usize;
            let data = vec![128; row * height as usize];
            let raw = frame(width, height, PixelFormat::Yuyv, vec![Plane::packed(data, row)]);
            let image = normalize(&raw).unwrap();
            assert_eq!((image.width, image.height), (width, height));
            assert_eq!(image.rgba.len(), (width * height * 4) as usize);
        }
    }

    fn encode_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let pixels = color.repeat((width * height) as usize);
        let mut bytes = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 95)
            .encode(&pixels, width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        bytes
    }

    #[test]
    fn mjpeg_decodes_at_frame_size() {
        let jpeg = encode_jpeg(8, 6, [200, 10, 10]);
        let len = jpeg.len();
        let image = normalize(&frame(8, 6, PixelFormat::Mjpeg, vec![Plane::packed(jpeg, len)]))
            .unwrap();

        assert_eq!((image.width, image.height), (8, 6));
        assert_eq!(image.rgba.len(), 8 * 6 * 4);
        for px in image.rgba.chunks(4) {
            assert!((px[0] as i32 - 200).abs() <= 12, "unexpected pixel {px:?}");
            assert!(px[1] <= 24 && px[2] <= 24, "unexpected pixel {px:?}");
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn mjpeg_with_other_dimensions_is_rejected() {
        let jpeg = encode_jpeg(8, 6, [200, 10, 10]);
        let len = jpeg.len();
        let err = normalize(&frame(16, 6, PixelFormat::Mjpeg, vec![Plane::packed(jpeg, len)]))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::DimensionMismatch {
                width: 16,
                height: 6,
                got_width: 8,
                got_height: 6,
            }
        ));
    }

    #[test]
    fn zero_sized_frame_is_empty() {
        let raw = frame(0, 0, PixelFormat::Rgba, vec![Plane::packed(vec![1, 2, 3, 4], 4)]);
        assert!(matches!(normalize(&raw), Err(DecodeError::EmptyFrame)));
    }
}
