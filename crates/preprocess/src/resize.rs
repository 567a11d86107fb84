//! Plane resampling
//!
//! `resize_area` follows the usual area-interpolation contract: a
//! fractional-coverage box filter when shrinking, bilinear with half-pixel
//! centres otherwise.

use ndarray::Array2;

/// Resize an 8-bit plane by area averaging
pub fn resize_area(src: &Array2<u8>, height: usize, width: usize) -> Array2<u8> {
    let (src_h, src_w) = src.dim();
    if (src_h, src_w) == (height, width) {
        return src.clone();
    }

    let plane = src.mapv(f32::from);
    let resized = if src_h >= height && src_w >= width {
        box_filter(&plane, height, width)
    } else {
        resize_bilinear(&plane, height, width)
    };
    resized.mapv(saturate_u8)
}

/// Resize a float plane with bilinear interpolation
///
/// An empty source yields an all-zero plane.
pub fn resize_bilinear(src: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_h, src_w) = src.dim();
    if (src_h, src_w) == (height, width) {
        return src.clone();
    }
    if src_h == 0 || src_w == 0 {
        return Array2::zeros((height, width));
    }

    let rows = linear_taps(src_h, height);
    let cols = linear_taps(src_w, width);

    Array2::from_shape_fn((height, width), |(y, x)| {
        let (y0, y1, wy) = rows[y];
        let (x0, x1, wx) = cols[x];
        let top = src[[y0, x0]] * (1.0 - wx) + src[[y0, x1]] * wx;
        let bottom = src[[y1, x0]] * (1.0 - wx) + src[[y1, x1]] * wx;
        top * (1.0 - wy) + bottom * wy
    })
}

/// Round to the nearest 8-bit value, saturating
pub fn saturate_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Source index pair and weight of the second tap, per destination index
fn linear_taps(src_len: usize, dst_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = src_len as f32 / dst_len as f32;
    let last = src_len - 1;
    (0..dst_len)
        .map(|d| {
            let f = (d as f32 + 0.5) * scale - 0.5;
            let mut i0 = f.floor();
            let mut w = f - i0;
            if i0 < 0.0 {
                i0 = 0.0;
                w = 0.0;
            }
            let mut i0 = i0 as usize;
            if i0 >= last {
                i0 = last;
                w = 0.0;
            }
            (i0, (i0 + 1).min(last), w)
        })
        .collect()
}

/// Source indices and coverage weights, per destination index
fn area_taps(src_len: usize, dst_len: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = ((d + 1) as f64 * scale).min(src_len as f64);
            let mut taps = Vec::new();
            let mut s = start.floor() as usize;
            while (s as f64) < end && s < src_len {
                let lo = start.max(s as f64);
                let hi = end.min((s + 1) as f64);
                if hi > lo {
                    taps.push((s, ((hi - lo) / scale) as f32));
                }
                s += 1;
            }
            taps
        })
        .collect()
}

fn box_filter(src: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_h, _) = src.dim();
    let cols = area_taps(src.dim().1, width);
    let rows = area_taps(src_h, height);

    // Horizontal pass, then vertical
    let horizontal = Array2::from_shape_fn((src_h, width), |(y, x)| {
        cols[x].iter().map(|&(sx, w)| src[[y, sx]] * w).sum::<f32>()
    });
    Array2::from_shape_fn((height, width), |(y, x)| {
        rows[y].iter().map(|&(sy, w)| horizontal[[sy, x]] * w).sum::<f32>()
    })
}
