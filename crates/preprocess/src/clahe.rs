//! Contrast-limited adaptive histogram equalization

use ndarray::Array2;

use crate::resize::saturate_u8;

const HIST_SIZE: usize = 256;

/// CLAHE operator for 8-bit planes
#[derive(Debug, Clone, Copy)]
pub struct Clahe {
    clip_limit: f32,
    tiles_y: usize,
    tiles_x: usize,
}

impl Clahe {
    /// Create an operator with a clip limit and a (rows, cols) tile grid
    pub fn new(clip_limit: f32, tile_grid: (usize, usize)) -> Self {
        Self {
            clip_limit,
            tiles_y: tile_grid.0.max(1),
            tiles_x: tile_grid.1.max(1),
        }
    }

    /// Equalize a plane
    pub fn apply(&self, src: &Array2<u8>) -> Array2<u8> {
        let (height, width) = src.dim();
        if height == 0 || width == 0 {
            return src.clone();
        }

        // Tiles must cover the plane exactly; pad right/bottom by reflection
        let padded_h = height.div_ceil(self.tiles_y) * self.tiles_y;
        let padded_w = width.div_ceil(self.tiles_x) * self.tiles_x;
        let tile_h = padded_h / self.tiles_y;
        let tile_w = padded_w / self.tiles_x;

        let luts = self.tile_luts(src, tile_h, tile_w);
        self.interpolate(src, &luts, tile_h, tile_w)
    }

    fn tile_luts(&self, src: &Array2<u8>, tile_h: usize, tile_w: usize) -> Vec<[u8; HIST_SIZE]> {
        let (height, width) = src.dim();
        let tile_total = tile_h * tile_w;
        let clip = if self.clip_limit > 0.0 {
            ((self.clip_limit * tile_total as f32 / HIST_SIZE as f32) as usize).max(1)
        } else {
            usize::MAX
        };
        let lut_scale = (HIST_SIZE - 1) as f32 / tile_total as f32;

        let mut luts = Vec::with_capacity(self.tiles_y * self.tiles_x);
        for ty in 0..self.tiles_y {
            for tx in 0..self.tiles_x {
                let mut hist = [0usize; HIST_SIZE];
                for y in ty * tile_h..(ty + 1) * tile_h {
                    let sy = reflect_101(y, height);
                    for x in tx * tile_w..(tx + 1) * tile_w {
                        let sx = reflect_101(x, width);
                        hist[src[[sy, sx]] as usize] += 1;
                    }
                }

                if clip != usize::MAX {
                    clip_histogram(&mut hist, clip);
                }

                let mut lut = [0u8; HIST_SIZE];
                let mut sum = 0usize;
                for (bin, count) in hist.iter().enumerate() {
                    sum += count;
                    lut[bin] = saturate_u8(sum as f32 * lut_scale);
                }
                luts.push(lut);
            }
        }
        luts
    }

    fn interpolate(
        &self,
        src: &Array2<u8>,
        luts: &[[u8; HIST_SIZE]],
        tile_h: usize,
        tile_w: usize,
    ) -> Array2<u8> {
        let (height, width) = src.dim();
        let cols: Vec<(usize, usize, f32)> = (0..width)
            .map(|x| neighbour_tiles(x, tile_w, self.tiles_x))
            .collect();

        let mut dst = Array2::zeros((height, width));
        for y in 0..height {
            let (ty1, ty2, ya) = neighbour_tiles(y, tile_h, self.tiles_y);
            let ya1 = 1.0 - ya;
            for x in 0..width {
                let (tx1, tx2, xa) = cols[x];
                let xa1 = 1.0 - xa;
                let v = src[[y, x]] as usize;
                let lut = |ty: usize, tx: usize| luts[ty * self.tiles_x + tx][v] as f32;
                let res = (lut(ty1, tx1) * xa1 + lut(ty1, tx2) * xa) * ya1
                    + (lut(ty2, tx1) * xa1 + lut(ty2, tx2) * xa) * ya;
                dst[[y, x]] = saturate_u8(res);
            }
        }
        dst
    }
}

/// Clip bins at `clip` and spread the excess uniformly
fn clip_histogram(hist: &mut [usize; HIST_SIZE], clip: usize) {
    let mut excess = 0usize;
    for count in hist.iter_mut() {
        if *count > clip {
            excess += *count - clip;
            *count = clip;
        }
    }

    let batch = excess / HIST_SIZE;
    let mut residual = excess - batch * HIST_SIZE;
    for count in hist.iter_mut() {
        *count += batch;
    }

    if residual > 0 {
        let step = (HIST_SIZE / residual).max(1);
        let mut bin = 0;
        while bin < HIST_SIZE && residual > 0 {
            hist[bin] += 1;
            residual -= 1;
            bin += step;
        }
    }
}

/// The two tiles whose centres bracket `pos`, and the weight of the second
fn neighbour_tiles(pos: usize, tile_len: usize, tiles: usize) -> (usize, usize, f32) {
    let f = pos as f32 / tile_len as f32 - 0.5;
    let t1 = f.floor();
    let weight = f - t1;
    let t2 = t1 as isize + 1;
    let t1 = (t1 as isize).max(0) as usize;
    let t2 = (t2.min(tiles as isize - 1)).max(0) as usize;
    (t1, t2, weight)
}

fn reflect_101(i: usize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    if i < len {
        i
    } else {
        (2 * len - 2).saturating_sub(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_plane_stays_constant() {
        let src = Array2::from_elem((64, 64), 128u8);
        let out = Clahe::new(2.0, (4, 4)).apply(&src);
        let first = out[[0, 0]];
        assert!(out.iter().all(|&v| v == first));
        // Clipped histogram spreads mass below the spike, lifting it slightly
        assert_eq!(first, 130);
    }

    #[test]
    fn test_low_contrast_gradient_is_stretched() {
        let src = Array2::from_shape_fn((64, 64), |(_, x)| 100 + (x / 8) as u8);
        let out = Clahe::new(40.0, (4, 4)).apply(&src);
        let in_range = src.iter().max().unwrap() - src.iter().min().unwrap();
        let out_range = out.iter().max().unwrap() - out.iter().min().unwrap();
        assert!(out_range > in_range);
    }

    #[test]
    fn test_single_tile_without_clip_is_global_equalization() {
        let src = Array2::from_shape_fn((8, 8), |(y, _)| if y < 4 { 0u8 } else { 255 });
        let out = Clahe::new(0.0, (1, 1)).apply(&src);
        assert_eq!(out[[0, 0]], 128);
        assert_eq!(out[[7, 7]], 255);
    }

    #[test]
    fn test_uneven_plane_is_padded() {
        let src = Array2::from_shape_fn((30, 19), |(y, x)| ((y * 7 + x * 3) % 256) as u8);
        let out = Clahe::new(2.0, (4, 4)).apply(&src);
        assert_eq!(out.dim(), (30, 19));
    }

    #[test]
    fn test_clip_histogram_conserves_mass() {
        let mut hist = [0usize; HIST_SIZE];
        hist[10] = 1000;
        hist[200] = 37;
        clip_histogram(&mut hist, 64);
        assert_eq!(hist.iter().sum::<usize>(), 1037);
        assert!(hist[10] <= 64 + 4);
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(4, 5), 4);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(3, 1), 0);
    }
}
