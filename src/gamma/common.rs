use super::{GammaNormalization, GammaParameters};
use crate::image::{ImageData, ImageSize};

/// Squared 1-D Euclidean distance.
#[inline]
pub(super) fn dist_sq_1d(a: f32, b: f32) -> f32 {
    (b - a) * (b - a)
}

/// Squared 2-D Euclidean distance.
#[inline]
pub(super) fn dist_sq_2d(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    (x2 - x1) * (x2 - x1) + (y2 - y1) * (y2 - y1)
}

/// Squared 3-D Euclidean distance.
#[inline]
pub(super) fn dist_sq_3d(x1: f32, y1: f32, z1: f32, x2: f32, y2: f32, z2: f32) -> f32 {
    (x2 - x1) * (x2 - x1) + (y2 - y1) * (y2 - y1) + (z2 - z1) * (z2 - z1)
}

/// Normalization constants shared by every kernel, derived once per call.
#[derive(Debug, Clone, Copy)]
pub(super) struct KernelConsts {
    pub dd_inv_sq: f32,
    pub dta_inv_sq: f32,
    pub global_norm_dose_inv_sq: f32,
    pub is_global: bool,
}

impl KernelConsts {
    pub(super) fn new(params: &GammaParameters) -> Self {
        Self {
            dd_inv_sq: (100.0 * 100.0) / (params.dd_threshold * params.dd_threshold),
            dta_inv_sq: 1.0 / (params.dta_threshold * params.dta_threshold),
            global_norm_dose_inv_sq: 1.0 / (params.global_norm_dose * params.global_norm_dose),
            is_global: params.normalization == GammaNormalization::Global,
        }
    }

    /// Squared inverse of the normalized DD for one reference voxel.
    #[inline]
    pub(super) fn dd_norm_inv_sq(&self, dose_ref: f32) -> f32 {
        if self.is_global {
            self.dd_inv_sq * self.global_norm_dose_inv_sq
        } else {
            self.dd_inv_sq / (dose_ref * dose_ref)
        }
    }
}

/// Marks every reference voxel either NaN (ineligible) or +∞ (to-do) and
/// counts the to-do voxels. Runs single-threaded before the worker fan-out.
///
/// Ineligible: NaN dose, dose below the cutoff, or zero dose under local
/// normalization (the per-voxel normalization would divide by zero).
pub(super) fn premask(ref_img: &ImageData, params: &GammaParameters) -> (Vec<f32>, usize) {
    let is_local = params.normalization == GammaNormalization::Local;
    let mut vals = Vec::with_capacity(ref_img.len());
    let mut eligible = 0;
    for i in 0..ref_img.len() {
        let dose = ref_img.get_flat(i);
        if dose.is_nan() || dose < params.dose_cutoff || (is_local && dose == 0.0) {
            vals.push(f32::NAN);
        } else {
            vals.push(f32::INFINITY);
            eligible += 1;
        }
    }
    (vals, eligible)
}

/// Splits a flat index into (row, column).
#[inline]
pub(super) fn index_to_2d(index: usize, size: ImageSize) -> (u32, u32) {
    let columns = size.columns as usize;
    ((index / columns) as u32, (index % columns) as u32)
}

/// Splits a flat index into (frame, row, column).
#[inline]
pub(super) fn index_to_3d(index: usize, size: ImageSize) -> (u32, u32, u32) {
    let frame_len = size.rows as usize * size.columns as usize;
    let (frame, rest) = (index / frame_len, index % frame_len);
    let columns = size.columns as usize;
    (frame as u32, (rest / columns) as u32, (rest % columns) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_index_splitting() {
        let size = ImageSize { frames: 2, rows: 3, columns: 4 };
        assert_eq!(index_to_2d(0, size), (0, 0));
        assert_eq!(index_to_2d(7, size), (1, 3));
        assert_eq!(index_to_3d(0, size), (0, 0, 0));
        assert_eq!(index_to_3d(13, size), (1, 0, 1));
        assert_eq!(index_to_3d(23, size), (1, 2, 3));
    }

    #[test]
    fn premask_marks_ineligible_voxels() {
        let img = ImageData::new(
            vec![0.0, 0.5, f32::NAN, 2.0],
            (1, 2, 2),
            (0.0, 0.0, 0.0),
            (0.0, 1.0, 1.0),
        )
        .unwrap();
        let params = GammaParameters {
            dd_threshold: 3.0,
            dta_threshold: 3.0,
            normalization: GammaNormalization::Global,
            global_norm_dose: 2.0,
            dose_cutoff: 0.4,
            max_search_distance: 0.0,
            step_size: 0.0,
        };
        let (vals, eligible) = premask(&img, &params);
        assert_eq!(eligible, 2);
        assert!(vals[0].is_nan());
        assert_eq!(vals[1], f32::INFINITY);
        assert!(vals[2].is_nan());
        assert_eq!(vals[3], f32::INFINITY);
    }

    #[test]
    fn premask_local_zero_dose() {
        let img = ImageData::new(
            vec![0.0, 1.0],
            (1, 1, 2),
            (0.0, 0.0, 0.0),
            (0.0, 1.0, 1.0),
        )
        .unwrap();
        let params = GammaParameters {
            dd_threshold: 3.0,
            dta_threshold: 3.0,
            normalization: GammaNormalization::Local,
            global_norm_dose: 0.0,
            dose_cutoff: 0.0,
            max_search_distance: 0.0,
            step_size: 0.0,
        };
        let (vals, eligible) = premask(&img, &params);
        assert_eq!(eligible, 1);
        assert!(vals[0].is_nan());
        assert_eq!(vals[1], f32::INFINITY);
    }
}
