//! C1: convert a rectangular sub-region of the mapped framebuffer from
//! layout L (linear or X-tiled-4KB) plus source fourcc (XR24) into packed
//! 24-bit RGB, scanline order (§4.1).

use crate::fourcc::{Layout, PixelFormat};
use crate::geometry::Geometry;

/// Compute `[y0, y1)` rows of the output image owned by worker `i` of `n`
/// (§3: `strip_h = ceil(h / N)`, worker i owns `[i*strip_h, min((i+1)*strip_h, h))`).
pub fn strip_bounds(i: usize, n: usize, h: usize) -> (usize, usize) {
    let strip_h = h.div_ceil(n);
    let y0 = (i * strip_h).min(h);
    let y1 = ((i + 1) * strip_h).min(h);
    (y0, y1)
}

/// Detile rows `[strip_y0, strip_y0 + rows)` of `geom`'s output into
/// `out_strip`, which must be exactly `rows * geom.w * 3` bytes — the
/// caller (the worker pool) hands each worker a disjoint mutable slice of
/// the shared output image so the type system enforces the "never writes
/// outside its strip" invariant (§4.2) rather than a runtime check.
pub fn detile_strip(
    src: &[u8],
    pitch: usize,
    format: PixelFormat,
    layout: Layout,
    geom: Geometry,
    strip_y0: usize,
    rows: usize,
    out_strip: &mut [u8],
) {
    let PixelFormat::Xrgb8888 = format;
    let w = geom.w as usize;
    assert_eq!(out_strip.len(), rows * w * 3);

    match layout {
        Layout::Linear => detile_linear(src, pitch, geom, strip_y0, rows, out_strip),
        Layout::XTiled4k => detile_x_tiled(src, pitch, geom, strip_y0, rows, out_strip),
    }
}

/// Linear layout: `src = Y*pitch + X*4`. Read directly off the source
/// bytes, no intermediate allocation — each output row is produced by
/// swapping B,G,R to R,G,B in place as it's copied.
fn detile_linear(src: &[u8], pitch: usize, geom: Geometry, strip_y0: usize, rows: usize, out: &mut [u8]) {
    let w = geom.w as usize;
    for dy in 0..rows {
        let src_y = geom.y as usize + strip_y0 + dy;
        let row_start = src_y * pitch + geom.x as usize * 4;
        let src_row = &src[row_start..row_start + w * 4];
        let out_row = &mut out[dy * w * 3..(dy + 1) * w * 3];
        for dx in 0..w {
            let s = &src_row[dx * 4..dx * 4 + 3];
            let o = &mut out_row[dx * 3..dx * 3 + 3];
            o[0] = s[2]; // R
            o[1] = s[1]; // G
            o[2] = s[0]; // B
        }
    }
}

/// X-tiled, 4 KiB tiles (128×8 pixels at 4 B each):
/// `src = (Y/8)*4096*(pitch/512) + (X/128)*4096 + (Y%8)*512 + (X%128)*4`.
fn detile_x_tiled(src: &[u8], pitch: usize, geom: Geometry, strip_y0: usize, rows: usize, out: &mut [u8]) {
    let w = geom.w as usize;
    let tile_stride = pitch / 512;
    for dy in 0..rows {
        let big_y = geom.y as usize + strip_y0 + dy;
        let out_row = &mut out[dy * w * 3..(dy + 1) * w * 3];
        for dx in 0..w {
            let big_x = geom.x as usize + dx;
            let src_idx = (big_y / 8) * 4096 * tile_stride
                + (big_x / 128) * 4096
                + (big_y % 8) * 512
                + (big_x % 128) * 4;
            let o = &mut out_row[dx * 3..dx * 3 + 3];
            o[0] = src[src_idx + 2];
            o[1] = src[src_idx + 1];
            o[2] = src[src_idx];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bgrx(pixels: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(pixels.len() * 4);
        for &(b, g, r) in pixels {
            out.extend_from_slice(&[b, g, r, 0]);
        }
        out
    }

    // Seed scenario 1: linear screenshot, full frame.
    #[test]
    fn linear_full_frame() {
        let src = bgrx(&[
            (10, 20, 30), (11, 21, 31), (12, 22, 32), (13, 23, 33),
            (14, 24, 34), (15, 25, 35), (16, 26, 36), (17, 27, 37),
        ]);
        let geom = Geometry { x: 0, y: 0, w: 4, h: 2 };
        let mut out = vec![0u8; 4 * 2 * 3];
        detile_strip(&src, 16, PixelFormat::Xrgb8888, Layout::Linear, geom, 0, 2, &mut out);
        assert_eq!(
            out,
            vec![
                30, 20, 10, 31, 21, 11, 32, 22, 12, 33, 23, 13,
                34, 24, 14, 35, 25, 15, 36, 26, 16, 37, 27, 17,
            ]
        );
    }

    // Seed scenario 2: tiled-X screenshot, single tile.
    #[test]
    fn x_tiled_single_tile() {
        let mut src = vec![0u8; 4096];
        for j in 0u32..8 {
            for i in 0u32..128 {
                let idx = ((j % 8) * 512 + (i % 128) * 4) as usize;
                src[idx] = i as u8; // B
                src[idx + 1] = j as u8; // G
                src[idx + 2] = (i ^ j) as u8; // R
            }
        }
        let geom = Geometry { x: 0, y: 0, w: 128, h: 8 };
        let mut out = vec![0u8; 128 * 8 * 3];
        detile_strip(&src, 512, PixelFormat::Xrgb8888, Layout::XTiled4k, geom, 0, 8, &mut out);
        for j in 0u32..8 {
            for i in 0u32..128 {
                let off = ((j * 128 + i) * 3) as usize;
                assert_eq!(out[off], i ^ j);
                assert_eq!(out[off + 1], j as u8);
                assert_eq!(out[off + 2], i as u8);
            }
        }
    }

    // Seed scenario 3: geometry sub-rect over the same tiled source.
    #[test]
    fn x_tiled_geometry_sub_rect() {
        let mut src = vec![0u8; 4096];
        for j in 0u32..8 {
            for i in 0u32..128 {
                let idx = ((j % 8) * 512 + (i % 128) * 4) as usize;
                src[idx] = i as u8;
                src[idx + 1] = j as u8;
                src[idx + 2] = (i ^ j) as u8;
            }
        }
        let geom = Geometry { x: 16, y: 2, w: 32, h: 4 };
        let mut out = vec![0u8; 32 * 4 * 3];
        detile_strip(&src, 512, PixelFormat::Xrgb8888, Layout::XTiled4k, geom, 0, 4, &mut out);
        for j in 0u32..4 {
            for i in 0u32..32 {
                let off = ((j * 32 + i) * 3) as usize;
                let big_i = 16 + i;
                let big_j = 2 + j;
                assert_eq!(out[off], (big_i ^ big_j) as u8);
                assert_eq!(out[off + 1], big_j as u8);
                assert_eq!(out[off + 2], big_i as u8);
            }
        }
    }

    #[test]
    fn strip_bounds_partition_is_exact_and_disjoint() {
        let h = 37;
        let n = 4;
        let mut covered = vec![false; h];
        for i in 0..n {
            let (y0, y1) = strip_bounds(i, n, h);
            for row in covered.iter_mut().take(y1).skip(y0) {
                assert!(!*row, "row covered twice");
                *row = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }
}
