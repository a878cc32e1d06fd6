//! CPU plane layout helpers for texture uploads.

use std::borrow::Cow;

use sprocket_core::video::Plane;

/// wgpu requires bytes_per_row to be aligned to this value.
pub const COPY_BYTES_PER_ROW_ALIGNMENT: u32 = 256;

/// Aligns a value up to the nearest multiple of alignment.
pub fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Pads each row of a plane to [`COPY_BYTES_PER_ROW_ALIGNMENT`].
///
/// Returns the padded row pitch and the data, borrowed when no padding is
/// needed. Rows missing from a truncated plane are zero-filled.
pub fn pad_plane_data(data: &[u8], stride: usize, height: u32) -> (u32, Cow<'_, [u8]>) {
    let stride_u32 = stride as u32;
    let aligned = align_up(stride_u32, COPY_BYTES_PER_ROW_ALIGNMENT);

    if aligned == stride_u32 && data.len() >= stride * height as usize {
        return (stride_u32, Cow::Borrowed(data));
    }

    let mut padded = vec![0u8; aligned as usize * height as usize];
    for (row, out) in padded.chunks_exact_mut(aligned as usize).enumerate() {
        let start = row * stride;
        if start >= data.len() {
            break;
        }
        let end = (start + stride).min(data.len());
        out[..end - start].copy_from_slice(&data[start..end]);
    }
    (aligned, Cow::Owned(padded))
}

/// Interleaves separate U and V planes into one NV12-style UV plane.
///
/// `width` and `height` are chroma dimensions. The result has a tight
/// stride of `2 * width` and is empty when either dimension is zero.
pub fn interleave_uv(u: &Plane, v: &Plane, width: u32, height: u32) -> Vec<u8> {
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let mut out = vec![0u8; width * 2 * height];
    for (row, out_row) in out.chunks_exact_mut(width * 2).enumerate() {
        let u_row = u.data.get(row * u.stride..).unwrap_or(&[]);
        let v_row = v.data.get(row * v.stride..).unwrap_or(&[]);
        for (x, pair) in out_row.chunks_exact_mut(2).enumerate() {
            pair[0] = u_row.get(x).copied().unwrap_or(128);
            pair[1] = v_row.get(x).copied().unwrap_or(128);
        }
    }
    out
}
