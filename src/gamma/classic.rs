//! Exhaustive gamma kernels: every eligible reference voxel is minimized over
//! every voxel of the evaluated image.
//!
//! Each kernel processes a `[start, end)` range of the flat output, resuming
//! the frame/row/column walk from `start` so that workers can pick up
//! mid-volume. `out` covers exactly that range; voxels whose sentinel is not
//! +∞ were pre-masked and are skipped.

use super::common::{dist_sq_1d, dist_sq_2d, dist_sq_3d, index_to_2d, index_to_3d, KernelConsts};
use crate::image::ImageData;

pub(super) fn classic_2d(
    ref_img: &ImageData,
    eval_img: &ImageData,
    consts: KernelConsts,
    start: usize,
    end: usize,
    out: &mut [f32],
) {
    let ref_size = ref_img.size();
    let (ref_off, ref_sp) = (ref_img.offset(), ref_img.spacing());
    let eval_size = eval_img.size();
    let (eval_off, eval_sp) = (eval_img.offset(), eval_img.spacing());

    let (j_start, i_start) = index_to_2d(start, ref_size);

    let mut ind_ref = start;
    let mut yr = ref_off.rows + j_start as f32 * ref_sp.rows;
    for jr in j_start..ref_size.rows {
        if ind_ref >= end {
            break;
        }
        let i_first = if jr == j_start { i_start } else { 0 };
        let mut xr = ref_off.columns + i_first as f32 * ref_sp.columns;
        for _ir in i_first..ref_size.columns {
            if ind_ref >= end {
                break;
            }
            if out[ind_ref - start] == f32::INFINITY {
                let dose_ref = ref_img.get_flat(ind_ref);
                let dd_norm_inv_sq = consts.dd_norm_inv_sq(dose_ref);
                let mut min_gamma_sq = f32::INFINITY;

                let mut ind_eval = 0;
                let mut ye = eval_off.rows;
                for _je in 0..eval_size.rows {
                    let mut xe = eval_off.columns;
                    for _ie in 0..eval_size.columns {
                        let dose_eval = eval_img.get_flat(ind_eval);
                        let gamma_sq = dist_sq_1d(dose_eval, dose_ref) * dd_norm_inv_sq
                            + dist_sq_2d(xe, ye, xr, yr) * consts.dta_inv_sq;
                        if gamma_sq < min_gamma_sq {
                            min_gamma_sq = gamma_sq;
                        }
                        xe += eval_sp.columns;
                        ind_eval += 1;
                    }
                    ye += eval_sp.rows;
                }

                out[ind_ref - start] = finalize(min_gamma_sq);
            }
            xr += ref_sp.columns;
            ind_ref += 1;
        }
        yr += ref_sp.rows;
    }
}

pub(super) fn classic_2_5d(
    ref_img: &ImageData,
    eval_img: &ImageData,
    consts: KernelConsts,
    start: usize,
    end: usize,
    out: &mut [f32],
) {
    let ref_size = ref_img.size();
    let (ref_off, ref_sp) = (ref_img.offset(), ref_img.spacing());
    let eval_size = eval_img.size();
    let (eval_off, eval_sp) = (eval_img.offset(), eval_img.spacing());
    let eval_frame_len = eval_size.rows as usize * eval_size.columns as usize;

    let (k_start, j_start, i_start) = index_to_3d(start, ref_size);

    let mut ind_ref = start;
    let mut zr = ref_off.frames + k_start as f32 * ref_sp.frames;
    for kr in k_start..ref_size.frames {
        if ind_ref >= end {
            break;
        }
        let j_first = if kr == k_start { j_start } else { 0 };
        let mut yr = ref_off.rows + j_first as f32 * ref_sp.rows;
        for jr in j_first..ref_size.rows {
            if ind_ref >= end {
                break;
            }
            let i_first = if kr == k_start && jr == j_start { i_start } else { 0 };
            let mut xr = ref_off.columns + i_first as f32 * ref_sp.columns;
            for _ir in i_first..ref_size.columns {
                if ind_ref >= end {
                    break;
                }
                if out[ind_ref - start] == f32::INFINITY {
                    let dose_ref = ref_img.get_flat(ind_ref);
                    let dd_norm_inv_sq = consts.dd_norm_inv_sq(dose_ref);
                    let mut min_gamma_sq = f32::INFINITY;

                    // restricted to the evaluated frame with the same index
                    let mut ind_eval = kr as usize * eval_frame_len;
                    let ze = eval_off.frames + kr as f32 * eval_sp.frames;
                    let mut ye = eval_off.rows;
                    for _je in 0..eval_size.rows {
                        let mut xe = eval_off.columns;
                        for _ie in 0..eval_size.columns {
                            let dose_eval = eval_img.get_flat(ind_eval);
                            let gamma_sq = dist_sq_1d(dose_eval, dose_ref) * dd_norm_inv_sq
                                + dist_sq_3d(xe, ye, ze, xr, yr, zr) * consts.dta_inv_sq;
                            if gamma_sq < min_gamma_sq {
                                min_gamma_sq = gamma_sq;
                            }
                            xe += eval_sp.columns;
                            ind_eval += 1;
                        }
                        ye += eval_sp.rows;
                    }

                    out[ind_ref - start] = finalize(min_gamma_sq);
                }
                xr += ref_sp.columns;
                ind_ref += 1;
            }
            yr += ref_sp.rows;
        }
        zr += ref_sp.frames;
    }
}

pub(super) fn classic_3d(
    ref_img: &ImageData,
    eval_img: &ImageData,
    consts: KernelConsts,
    start: usize,
    end: usize,
    out: &mut [f32],
) {
    let ref_size = ref_img.size();
    let (ref_off, ref_sp) = (ref_img.offset(), ref_img.spacing());
    let eval_size = eval_img.size();
    let (eval_off, eval_sp) = (eval_img.offset(), eval_img.spacing());

    let (k_start, j_start, i_start) = index_to_3d(start, ref_size);

    let mut ind_ref = start;
    let mut zr = ref_off.frames + k_start as f32 * ref_sp.frames;
    for kr in k_start..ref_size.frames {
        if ind_ref >= end {
            break;
        }
        let j_first = if kr == k_start { j_start } else { 0 };
        let mut yr = ref_off.rows + j_first as f32 * ref_sp.rows;
        for jr in j_first..ref_size.rows {
            if ind_ref >= end {
                break;
            }
            let i_first = if kr == k_start && jr == j_start { i_start } else { 0 };
            let mut xr = ref_off.columns + i_first as f32 * ref_sp.columns;
            for _ir in i_first..ref_size.columns {
                if ind_ref >= end {
                    break;
                }
                if out[ind_ref - start] == f32::INFINITY {
                    let dose_ref = ref_img.get_flat(ind_ref);
                    let dd_norm_inv_sq = consts.dd_norm_inv_sq(dose_ref);
                    let mut min_gamma_sq = f32::INFINITY;

                    let mut ind_eval = 0;
                    let mut ze = eval_off.frames;
                    for _ke in 0..eval_size.frames {
                        let mut ye = eval_off.rows;
                        for _je in 0..eval_size.rows {
                            let mut xe = eval_off.columns;
                            for _ie in 0..eval_size.columns {
                                let dose_eval = eval_img.get_flat(ind_eval);
                                let gamma_sq = dist_sq_1d(dose_eval, dose_ref) * dd_norm_inv_sq
                                    + dist_sq_3d(xe, ye, ze, xr, yr, zr) * consts.dta_inv_sq;
                                if gamma_sq < min_gamma_sq {
                                    min_gamma_sq = gamma_sq;
                                }
                                xe += eval_sp.columns;
                                ind_eval += 1;
                            }
                            ye += eval_sp.rows;
                        }
                        ze += eval_sp.frames;
                    }

                    out[ind_ref - start] = finalize(min_gamma_sq);
                }
                xr += ref_sp.columns;
                ind_ref += 1;
            }
            yr += ref_sp.rows;
        }
        zr += ref_sp.frames;
    }
}

/// A minimum that never left +∞ had no real candidate (every evaluated dose
/// was NaN, or the evaluated image is empty); such voxels carry no value.
#[inline]
pub(super) fn finalize(min_gamma_sq: f32) -> f32 {
    if min_gamma_sq.is_finite() { min_gamma_sq.sqrt() } else { f32::NAN }
}
