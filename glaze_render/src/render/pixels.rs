//! Packed pixel conversion for readback.
//!
//! `read_pixels` always produces RGBA bytes, which read as packed
//! ABGR8888 words on little-endian hosts. Converting to the caller's
//! requested format is a per-pixel channel shuffle between 32-bit
//! packed layouts; formats without an alpha channel read back opaque.

use crate::core::error::{record, RenderError, RenderResult};

use super::texture::PixelFormat;

/// Bit positions of each channel inside a packed 32-bit pixel.
struct PackedLayout {
    r: u32,
    g: u32,
    b: u32,
    a: Option<u32>,
}

fn packed_layout(format: PixelFormat) -> Option<PackedLayout> {
    match format {
        PixelFormat::Argb8888 => Some(PackedLayout {
            a: Some(24),
            r: 16,
            g: 8,
            b: 0,
        }),
        PixelFormat::Abgr8888 => Some(PackedLayout {
            a: Some(24),
            b: 16,
            g: 8,
            r: 0,
        }),
        PixelFormat::Rgb888 => Some(PackedLayout {
            a: None,
            r: 16,
            g: 8,
            b: 0,
        }),
        PixelFormat::Bgr888 => Some(PackedLayout {
            a: None,
            b: 16,
            g: 8,
            r: 0,
        }),
        _ => None,
    }
}

/// Converts `w`x`h` pixels between two packed 32-bit formats. Row
/// pitches are in bytes and may exceed `w * 4`.
pub(crate) fn convert(
    w: usize,
    h: usize,
    src_format: PixelFormat,
    src: &[u8],
    src_pitch: usize,
    dst_format: PixelFormat,
    dst: &mut [u8],
    dst_pitch: usize,
) -> RenderResult<()> {
    let src_layout = packed_layout(src_format).ok_or_else(|| {
        record(RenderError::UnsupportedFormat(format!(
            "cannot convert from {src_format:?}"
        )))
    })?;
    let dst_layout = packed_layout(dst_format).ok_or_else(|| {
        record(RenderError::UnsupportedFormat(format!(
            "cannot convert to {dst_format:?}"
        )))
    })?;

    let row_bytes = w * 4;
    if src.len() < (h.saturating_sub(1)) * src_pitch + row_bytes
        || dst.len() < (h.saturating_sub(1)) * dst_pitch + row_bytes
    {
        return Err(record(RenderError::InvalidState(
            "pixel buffer too small for conversion".into(),
        )));
    }

    for row in 0..h {
        let src_row = &src[row * src_pitch..row * src_pitch + row_bytes];
        let dst_row = &mut dst[row * dst_pitch..row * dst_pitch + row_bytes];
        for (src_px, dst_px) in src_row.chunks_exact(4).zip(dst_row.chunks_exact_mut(4)) {
            let word = u32::from_le_bytes([src_px[0], src_px[1], src_px[2], src_px[3]]);
            let r = (word >> src_layout.r) & 0xFF;
            let g = (word >> src_layout.g) & 0xFF;
            let b = (word >> src_layout.b) & 0xFF;
            let a = match src_layout.a {
                Some(shift) => (word >> shift) & 0xFF,
                None => 0xFF,
            };
            let mut out = (r << dst_layout.r) | (g << dst_layout.g) | (b << dst_layout.b);
            if let Some(shift) = dst_layout.a {
                out |= a << shift;
            }
            dst_px.copy_from_slice(&out.to_le_bytes());
        }
    }
    Ok(())
}

/// Reverses row order in place (bottom-up GL readback to top-down).
pub(crate) fn flip_rows(pixels: &mut [u8], pitch: usize, rows: usize) {
    if pitch == 0 || rows < 2 {
        return;
    }
    let mut tmp = vec![0u8; pitch];
    let (mut top, mut bottom) = (0, rows - 1);
    while top < bottom {
        let (head, tail) = pixels.split_at_mut(bottom * pitch);
        let top_row = &mut head[top * pitch..top * pitch + pitch];
        let bottom_row = &mut tail[..pitch];
        tmp.copy_from_slice(top_row);
        top_row.copy_from_slice(bottom_row);
        bottom_row.copy_from_slice(&tmp);
        top += 1;
        bottom -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abgr_to_argb_swaps_red_and_blue_bytes() {
        // One pixel, R=0x11 G=0x22 B=0x33 A=0x44 in ABGR packing
        // (bytes R,G,B,A little-endian).
        let src = [0x11, 0x22, 0x33, 0x44];
        let mut dst = [0u8; 4];
        convert(
            1,
            1,
            PixelFormat::Abgr8888,
            &src,
            4,
            PixelFormat::Argb8888,
            &mut dst,
            4,
        )
        .unwrap();
        // ARGB packing stores bytes B,G,R,A little-endian.
        assert_eq!(dst, [0x33, 0x22, 0x11, 0x44]);
    }

    #[test]
    fn alpha_reads_opaque_from_x_formats() {
        let src = [0x11, 0x22, 0x33, 0x00]; // X byte zero
        let mut dst = [0u8; 4];
        convert(
            1,
            1,
            PixelFormat::Bgr888,
            &src,
            4,
            PixelFormat::Abgr8888,
            &mut dst,
            4,
        )
        .unwrap();
        assert_eq!(dst[3], 0xFF);
    }

    #[test]
    fn identity_conversion_copies_rows_across_pitches() {
        let w = 2;
        let src = [1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0]; // pitch 12, one row used
        let mut dst = [0u8; 8];
        convert(
            w,
            1,
            PixelFormat::Abgr8888,
            &src,
            12,
            PixelFormat::Abgr8888,
            &mut dst,
            8,
        )
        .unwrap();
        assert_eq!(&dst, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn yuv_formats_are_rejected() {
        let src = [0u8; 4];
        let mut dst = [0u8; 4];
        let err = convert(
            1,
            1,
            PixelFormat::Abgr8888,
            &src,
            4,
            PixelFormat::Nv12,
            &mut dst,
            4,
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedFormat(_)));
    }

    #[test]
    fn flip_rows_reverses_vertically() {
        let mut buf = vec![
            1, 1, 1, 1, // row 0
            2, 2, 2, 2, // row 1
            3, 3, 3, 3, // row 2
        ];
        flip_rows(&mut buf, 4, 3);
        assert_eq!(buf, vec![3, 3, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn undersized_buffers_error() {
        let src = [0u8; 4];
        let mut dst = [0u8; 3];
        assert!(convert(
            1,
            1,
            PixelFormat::Abgr8888,
            &src,
            4,
            PixelFormat::Argb8888,
            &mut dst,
            4,
        )
        .is_err());
    }
}
