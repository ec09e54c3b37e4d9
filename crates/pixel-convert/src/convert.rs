//! Stride-aware pixel conversion

use crate::{ConvertError, PixelLayout};

/// Geometry of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes between the starts of consecutive rows
    pub stride: usize,
    /// Pixel layout
    pub layout: PixelLayout,
}

impl ImageDesc {
    /// Describe a tightly packed buffer (stride == row length)
    pub fn packed(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            stride: layout.min_stride(width).unwrap_or(width as usize),
            layout,
        }
    }

    /// Describe a buffer whose rows carry hardware padding
    pub fn with_stride(width: u32, height: u32, stride: usize, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            stride,
            layout,
        }
    }

    /// Bytes a buffer must hold to cover every row
    pub fn required_len(&self) -> usize {
        self.stride * self.height as usize
    }

    /// Check the description against a buffer of `len` bytes
    pub fn validate(&self, len: usize) -> Result<(), ConvertError> {
        let invalid = ConvertError::InvalidDimensions {
            width: self.width,
            height: self.height,
            layout: self.layout,
        };
        if self.width == 0 || self.height == 0 {
            return Err(invalid);
        }
        if self.layout.is_packed_422() && self.width % 2 != 0 {
            return Err(invalid);
        }

        if let Some(min) = self.layout.min_stride(self.width) {
            if self.stride < min {
                return Err(ConvertError::InvalidStride {
                    stride: self.stride,
                    min,
                });
            }
        }

        let needed = self.required_len();
        if len < needed {
            return Err(ConvertError::BufferTooSmall {
                needed,
                actual: len,
            });
        }
        Ok(())
    }
}

/// Stateless converter between pixel layouts
///
/// Every entry point validates source and destination up front, so a failed
/// conversion never leaves partially written output behind. Conversions are
/// pure and may run concurrently on different frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelConverter;

impl PixelConverter {
    /// Whether a conversion path exists from `from` to `to`
    pub fn supports(from: PixelLayout, to: PixelLayout) -> bool {
        use PixelLayout::*;
        match (from, to) {
            (Nv12, _) | (_, Nv12) => false,
            (a, b) if a == b => true,
            (Uyvy | Yuyv, Uyvy | Yuyv | Rgb24 | Bgra32 | Gray8) => true,
            (Rgb24, Uyvy | Yuyv) => true,
            _ => false,
        }
    }

    /// Convert into a newly allocated, tightly packed buffer
    pub fn convert(
        src: &[u8],
        src_desc: &ImageDesc,
        target: PixelLayout,
    ) -> Result<(Vec<u8>, ImageDesc), ConvertError> {
        if !Self::supports(src_desc.layout, target) {
            return Err(ConvertError::UnsupportedFormat {
                from: src_desc.layout,
                to: target,
            });
        }
        let dst_desc = ImageDesc::packed(src_desc.width, src_desc.height, target);
        let mut dst = vec![0u8; dst_desc.required_len()];
        Self::convert_into(src, src_desc, &mut dst, &dst_desc)?;
        Ok((dst, dst_desc))
    }

    /// Convert into a caller-provided buffer
    pub fn convert_into(
        src: &[u8],
        src_desc: &ImageDesc,
        dst: &mut [u8],
        dst_desc: &ImageDesc,
    ) -> Result<(), ConvertError> {
        let (from, to) = (src_desc.layout, dst_desc.layout);
        if !Self::supports(from, to) {
            return Err(ConvertError::UnsupportedFormat { from, to });
        }
        if src_desc.width != dst_desc.width || src_desc.height != dst_desc.height {
            return Err(ConvertError::InvalidDimensions {
                width: dst_desc.width,
                height: dst_desc.height,
                layout: to,
            });
        }
        src_desc.validate(src.len())?;
        dst_desc.validate(dst.len())?;

        let width = src_desc.width as usize;
        let src_row_len = from.min_stride(src_desc.width).unwrap_or(width);
        let dst_row_len = to.min_stride(dst_desc.width).unwrap_or(width);

        for y in 0..src_desc.height as usize {
            let s = &src[y * src_desc.stride..y * src_desc.stride + src_row_len];
            let d = &mut dst[y * dst_desc.stride..y * dst_desc.stride + dst_row_len];
            convert_row(s, from, d, to);
        }
        Ok(())
    }
}

fn convert_row(src: &[u8], from: PixelLayout, dst: &mut [u8], to: PixelLayout) {
    use PixelLayout::*;
    match (from, to) {
        (a, b) if a == b => dst.copy_from_slice(src),
        (Uyvy | Yuyv, Uyvy | Yuyv) => {
            for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
                d.copy_from_slice(&[s[1], s[0], s[3], s[2]]);
            }
        }
        (Uyvy | Yuyv, Gray8) => {
            for (pair, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(2)) {
                let (_, y0, _, y1) = unpack_422(pair, from);
                d[0] = y0;
                d[1] = y1;
            }
        }
        (Uyvy | Yuyv, Rgb24) => {
            for (pair, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(6)) {
                let (u, y0, v, y1) = unpack_422(pair, from);
                d[..3].copy_from_slice(&yuv_to_rgb(y0, u, v));
                d[3..].copy_from_slice(&yuv_to_rgb(y1, u, v));
            }
        }
        (Uyvy | Yuyv, Bgra32) => {
            for (pair, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(8)) {
                let (u, y0, v, y1) = unpack_422(pair, from);
                let [r0, g0, b0] = yuv_to_rgb(y0, u, v);
                let [r1, g1, b1] = yuv_to_rgb(y1, u, v);
                d.copy_from_slice(&[b0, g0, r0, 255, b1, g1, r1, 255]);
            }
        }
        (Rgb24, Uyvy | Yuyv) => {
            for (px, d) in src.chunks_exact(6).zip(dst.chunks_exact_mut(4)) {
                let (y0, u0, v0) = rgb_to_yuv(px[0], px[1], px[2]);
                let (y1, u1, v1) = rgb_to_yuv(px[3], px[4], px[5]);
                let u = ((u0 as u16 + u1 as u16 + 1) / 2) as u8;
                let v = ((v0 as u16 + v1 as u16 + 1) / 2) as u8;
                if to == Uyvy {
                    d.copy_from_slice(&[u, y0, v, y1]);
                } else {
                    d.copy_from_slice(&[y0, u, y1, v]);
                }
            }
        }
        // Unreachable: `supports` gates every call
        _ => {}
    }
}

/// Split one 4-byte 4:2:2 group into (Cb, Y0, Cr, Y1)
#[inline]
fn unpack_422(pair: &[u8], layout: PixelLayout) -> (u8, u8, u8, u8) {
    match layout {
        PixelLayout::Yuyv => (pair[1], pair[0], pair[3], pair[2]),
        _ => (pair[0], pair[1], pair[2], pair[3]),
    }
}

#[inline]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Full-range BT.601, 16.16 fixed point
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = (y as i32) << 16;
    let u = u as i32 - 128;
    let v = v as i32 - 128;
    let r = (y + 91_881 * v + 32_768) >> 16;
    let g = (y - 22_554 * u - 46_802 * v + 32_768) >> 16;
    let b = (y + 116_130 * u + 32_768) >> 16;
    [clamp(r), clamp(g), clamp(b)]
}

#[inline]
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = (19_595 * r + 38_470 * g + 7_471 * b + 32_768) >> 16;
    let u = ((-11_059 * r - 21_709 * g + 32_768 * b + 32_768) >> 16) + 128;
    let v = ((32_768 * r - 27_439 * g - 5_329 * b + 32_768) >> 16) + 128;
    (clamp(y), clamp(u), clamp(v))
}
