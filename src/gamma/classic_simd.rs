//! Lane-parallel minimize for the exhaustive kernels.
//!
//! The evaluated image's world coordinates are flattened into per-axis arrays
//! once per call, so the inner loop is a single flat scan in lanes of 8 f32.
//! AVX2 availability is detected once per call; without it the flat scan runs
//! scalar, which is observationally identical. Alignment of every lane-loaded
//! pointer is checked once up front and selects aligned or unaligned loads.
//!
//! Unlike the scalar kernels, the lane loop stops scanning as soon as the
//! running minimum drops to 1 or below: the voxel has passed and no further
//! candidate can change that verdict, only the exact value.

use super::common::{dist_sq_1d, index_to_2d, index_to_3d, KernelConsts};
use crate::image::ImageData;

const LANES: usize = 8;

/// Flattened world coordinates of every evaluated voxel.
pub(super) struct EvalCoords {
    pub xs: Vec<f32>,
    pub ys: Vec<f32>,
    pub zs: Vec<f32>,
}

impl EvalCoords {
    /// `with_z` is only needed by the unrestricted 3-D kernel; the 2-D and
    /// per-frame kernels fold the frame term in as a scalar.
    pub(super) fn new(img: &ImageData, with_z: bool) -> Self {
        let size = img.size();
        let (off, sp) = (img.offset(), img.spacing());
        let n = img.len();
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);
        let mut zs = Vec::with_capacity(if with_z { n } else { 0 });

        let mut z = off.frames;
        for _k in 0..size.frames {
            let mut y = off.rows;
            for _j in 0..size.rows {
                let mut x = off.columns;
                for _i in 0..size.columns {
                    xs.push(x);
                    ys.push(y);
                    if with_z {
                        zs.push(z);
                    }
                    x += sp.columns;
                }
                y += sp.rows;
            }
            z += sp.frames;
        }
        Self { xs, ys, zs }
    }
}

fn lane_aligned(s: &[f32]) -> bool {
    s.as_ptr() as usize % (LANES * std::mem::size_of::<f32>()) == 0
}

pub(super) fn classic_2d(
    ref_img: &ImageData,
    eval_img: &ImageData,
    coords: &EvalCoords,
    consts: KernelConsts,
    use_avx2: bool,
    start: usize,
    end: usize,
    out: &mut [f32],
) {
    let ref_size = ref_img.size();
    let (ref_off, ref_sp) = (ref_img.offset(), ref_img.spacing());
    let doses = eval_img.data();
    let aligned = lane_aligned(doses) && lane_aligned(&coords.xs) && lane_aligned(&coords.ys);

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
                let min_gamma_sq = min_plane(
                    doses,
                    &coords.xs,
                    &coords.ys,
                    dose_ref,
                    xr,
                    yr,
                    consts.dd_norm_inv_sq(dose_ref),
                    consts.dta_inv_sq,
                    0.0,
                    use_avx2,
                    aligned,
                );
                out[ind_ref - start] = super::classic::finalize(min_gamma_sq);
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
    coords: &EvalCoords,
    consts: KernelConsts,
    use_avx2: bool,
    start: usize,
    end: usize,
    out: &mut [f32],
) {
    let ref_size = ref_img.size();
    let (ref_off, ref_sp) = (ref_img.offset(), ref_img.spacing());
    let eval_size = eval_img.size();
    let (eval_off, eval_sp) = (eval_img.offset(), eval_img.spacing());
    let frame_len = eval_size.rows as usize * eval_size.columns as usize;
    let doses = eval_img.data();
    // per-frame sub-slices stay lane-aligned only if the frame stride is a
    // whole number of lanes
    let aligned = lane_aligned(doses)
        && lane_aligned(&coords.xs)
        && lane_aligned(&coords.ys)
        && frame_len % LANES == 0;

    let (k_start, j_start, i_start) = index_to_3d(start, ref_size);

    let mut ind_ref = start;
    let mut zr = ref_off.frames + k_start as f32 * ref_sp.frames;
    for kr in k_start..ref_size.frames {
        if ind_ref >= end {
            break;
        }
        let frame_base = kr as usize * frame_len;
        let frame_doses = &doses[frame_base..frame_base + frame_len];
        let frame_xs = &coords.xs[frame_base..frame_base + frame_len];
        let frame_ys = &coords.ys[frame_base..frame_base + frame_len];
        let ze = eval_off.frames + kr as f32 * eval_sp.frames;

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
                    let min_gamma_sq = min_plane(
                        frame_doses,
                        frame_xs,
                        frame_ys,
                        dose_ref,
                        xr,
                        yr,
                        consts.dd_norm_inv_sq(dose_ref),
                        consts.dta_inv_sq,
                        dist_sq_1d(ze, zr),
                        use_avx2,
                        aligned,
                    );
                    out[ind_ref - start] = super::classic::finalize(min_gamma_sq);
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
    coords: &EvalCoords,
    consts: KernelConsts,
    use_avx2: bool,
    start: usize,
    end: usize,
    out: &mut [f32],
) {
    let ref_size = ref_img.size();
    let (ref_off, ref_sp) = (ref_img.offset(), ref_img.spacing());
    let doses = eval_img.data();
    let aligned = lane_aligned(doses)
        && lane_aligned(&coords.xs)
        && lane_aligned(&coords.ys)
        && lane_aligned(&coords.zs);

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
                    let min_gamma_sq = min_volume(
                        doses,
                        &coords.xs,
                        &coords.ys,
                        &coords.zs,
                        dose_ref,
                        xr,
                        yr,
                        zr,
                        consts.dd_norm_inv_sq(dose_ref),
                        consts.dta_inv_sq,
                        use_avx2,
                        aligned,
                    );
                    out[ind_ref - start] = super::classic::finalize(min_gamma_sq);
                }
                xr += ref_sp.columns;
                ind_ref += 1;
            }
            yr += ref_sp.rows;
        }
        zr += ref_sp.frames;
    }
}

#[allow(clippy::too_many_arguments)]
fn min_plane(
    doses: &[f32],
    xs: &[f32],
    ys: &[f32],
    dose_ref: f32,
    xr: f32,
    yr: f32,
    dd_norm_inv_sq: f32,
    dta_inv_sq: f32,
    base_dist_sq: f32,
    use_avx2: bool,
    aligned: bool,
) -> f32 {
    if use_avx2 {
        unsafe {
            if aligned {
                min_plane_avx2::<true>(
                    doses, xs, ys, dose_ref, xr, yr, dd_norm_inv_sq, dta_inv_sq, base_dist_sq,
                )
            } else {
                min_plane_avx2::<false>(
                    doses, xs, ys, dose_ref, xr, yr, dd_norm_inv_sq, dta_inv_sq, base_dist_sq,
                )
            }
        }
    } else {
        min_plane_scalar(
            doses,
            xs,
            ys,
            0,
            dose_ref,
            xr,
            yr,
            dd_norm_inv_sq,
            dta_inv_sq,
            base_dist_sq,
            f32::INFINITY,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn min_plane_scalar(
    doses: &[f32],
    xs: &[f32],
    ys: &[f32],
    from: usize,
    dose_ref: f32,
    xr: f32,
    yr: f32,
    dd_norm_inv_sq: f32,
    dta_inv_sq: f32,
    base_dist_sq: f32,
    mut min_gamma_sq: f32,
) -> f32 {
    for i in from..doses.len() {
        let dx = xs[i] - xr;
        let dy = ys[i] - yr;
        let gamma_sq = dist_sq_1d(doses[i], dose_ref) * dd_norm_inv_sq
            + (dx * dx + dy * dy + base_dist_sq) * dta_inv_sq;
        if gamma_sq < min_gamma_sq {
            min_gamma_sq = gamma_sq;
            if min_gamma_sq <= 1.0 {
                break;
            }
        }
    }
    min_gamma_sq
}

#[allow(clippy::too_many_arguments)]
#[target_feature(enable = "avx2")]
unsafe fn min_plane_avx2<const ALIGNED: bool>(
    doses: &[f32],
    xs: &[f32],
    ys: &[f32],
    dose_ref: f32,
    xr: f32,
    yr: f32,
    dd_norm_inv_sq: f32,
    dta_inv_sq: f32,
    base_dist_sq: f32,
) -> f32 {
    use std::arch::x86_64::*;

    let chunks = doses.len() / LANES;
    let dose_rv = _mm256_set1_ps(dose_ref);
    let xrv = _mm256_set1_ps(xr);
    let yrv = _mm256_set1_ps(yr);
    let ddv = _mm256_set1_ps(dd_norm_inv_sq);
    let dtav = _mm256_set1_ps(dta_inv_sq);
    let basev = _mm256_set1_ps(base_dist_sq);
    let onev = _mm256_set1_ps(1.0);
    let mut minv = _mm256_set1_ps(f32::INFINITY);

    for c in 0..chunks {
        let i = c * LANES;
        let (dv, xv, yv) = if ALIGNED {
            (
                _mm256_load_ps(doses.as_ptr().add(i)),
                _mm256_load_ps(xs.as_ptr().add(i)),
                _mm256_load_ps(ys.as_ptr().add(i)),
            )
        } else {
            (
                _mm256_loadu_ps(doses.as_ptr().add(i)),
                _mm256_loadu_ps(xs.as_ptr().add(i)),
                _mm256_loadu_ps(ys.as_ptr().add(i)),
            )
        };

        let dd = _mm256_sub_ps(dv, dose_rv);
        let dd_sq = _mm256_mul_ps(dd, dd);
        let dx = _mm256_sub_ps(xv, xrv);
        let dy = _mm256_sub_ps(yv, yrv);
        let dist_sq =
            _mm256_add_ps(_mm256_add_ps(_mm256_mul_ps(dx, dx), _mm256_mul_ps(dy, dy)), basev);
        let gamma_sq =
            _mm256_add_ps(_mm256_mul_ps(dd_sq, ddv), _mm256_mul_ps(dist_sq, dtav));

        // keep the running minimum only in lanes with a real evaluated dose
        let real = _mm256_cmp_ps::<_CMP_ORD_Q>(dv, dv);
        let candidate = _mm256_min_ps(minv, gamma_sq);
        minv = _mm256_blendv_ps(minv, candidate, real);

        let passed = _mm256_cmp_ps::<_CMP_LE_OQ>(minv, onev);
        if _mm256_movemask_ps(passed) != 0 {
            return reduce_min(minv);
        }
    }

    let min_gamma_sq = reduce_min(minv);
    min_plane_scalar(
        doses,
        xs,
        ys,
        chunks * LANES,
        dose_ref,
        xr,
        yr,
        dd_norm_inv_sq,
        dta_inv_sq,
        base_dist_sq,
        min_gamma_sq,
    )
}

#[allow(clippy::too_many_arguments)]
fn min_volume(
    doses: &[f32],
    xs: &[f32],
    ys: &[f32],
    zs: &[f32],
    dose_ref: f32,
    xr: f32,
    yr: f32,
    zr: f32,
    dd_norm_inv_sq: f32,
    dta_inv_sq: f32,
    use_avx2: bool,
    aligned: bool,
) -> f32 {
    if use_avx2 {
        unsafe {
            if aligned {
                min_volume_avx2::<true>(
                    doses, xs, ys, zs, dose_ref, xr, yr, zr, dd_norm_inv_sq, dta_inv_sq,
                )
            } else {
                min_volume_avx2::<false>(
                    doses, xs, ys, zs, dose_ref, xr, yr, zr, dd_norm_inv_sq, dta_inv_sq,
                )
            }
        }
    } else {
        min_volume_scalar(
            doses,
            xs,
            ys,
            zs,
            0,
            dose_ref,
            xr,
            yr,
            zr,
            dd_norm_inv_sq,
            dta_inv_sq,
            f32::INFINITY,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn min_volume_scalar(
    doses: &[f32],
    xs: &[f32],
    ys: &[f32],
    zs: &[f32],
    from: usize,
    dose_ref: f32,
    xr: f32,
    yr: f32,
    zr: f32,
    dd_norm_inv_sq: f32,
    dta_inv_sq: f32,
    mut min_gamma_sq: f32,
) -> f32 {
    for i in from..doses.len() {
        let dx = xs[i] - xr;
        let dy = ys[i] - yr;
        let dz = zs[i] - zr;
        let gamma_sq = dist_sq_1d(doses[i], dose_ref) * dd_norm_inv_sq
            + (dx * dx + dy * dy + dz * dz) * dta_inv_sq;
        if gamma_sq < min_gamma_sq {
            min_gamma_sq = gamma_sq;
            if min_gamma_sq <= 1.0 {
                break;
            }
        }
    }
    min_gamma_sq
}

#[allow(clippy::too_many_arguments)]
#[target_feature(enable = "avx2")]
unsafe fn min_volume_avx2<const ALIGNED: bool>(
    doses: &[f32],
    xs: &[f32],
    ys: &[f32],
    zs: &[f32],
    dose_ref: f32,
    xr: f32,
    yr: f32,
    zr: f32,
    dd_norm_inv_sq: f32,
    dta_inv_sq: f32,
) -> f32 {
    use std::arch::x86_64::*;

    let chunks = doses.len() / LANES;
    let dose_rv = _mm256_set1_ps(dose_ref);
    let xrv = _mm256_set1_ps(xr);
    let yrv = _mm256_set1_ps(yr);
    let zrv = _mm256_set1_ps(zr);
    let ddv = _mm256_set1_ps(dd_norm_inv_sq);
    let dtav = _mm256_set1_ps(dta_inv_sq);
    let onev = _mm256_set1_ps(1.0);
    let mut minv = _mm256_set1_ps(f32::INFINITY);

    for c in 0..chunks {
        let i = c * LANES;
        let (dv, xv, yv, zv) = if ALIGNED {
            (
                _mm256_load_ps(doses.as_ptr().add(i)),
                _mm256_load_ps(xs.as_ptr().add(i)),
                _mm256_load_ps(ys.as_ptr().add(i)),
                _mm256_load_ps(zs.as_ptr().add(i)),
            )
        } else {
            (
                _mm256_loadu_ps(doses.as_ptr().add(i)),
                _mm256_loadu_ps(xs.as_ptr().add(i)),
                _mm256_loadu_ps(ys.as_ptr().add(i)),
                _mm256_loadu_ps(zs.as_ptr().add(i)),
            )
        };

        let dd = _mm256_sub_ps(dv, dose_rv);
        let dd_sq = _mm256_mul_ps(dd, dd);
        let dx = _mm256_sub_ps(xv, xrv);
        let dy = _mm256_sub_ps(yv, yrv);
        let dz = _mm256_sub_ps(zv, zrv);
        let dist_sq = _mm256_add_ps(
            _mm256_add_ps(_mm256_mul_ps(dx, dx), _mm256_mul_ps(dy, dy)),
            _mm256_mul_ps(dz, dz),
        );
        let gamma_sq =
            _mm256_add_ps(_mm256_mul_ps(dd_sq, ddv), _mm256_mul_ps(dist_sq, dtav));

        let real = _mm256_cmp_ps::<_CMP_ORD_Q>(dv, dv);
        let candidate = _mm256_min_ps(minv, gamma_sq);
        minv = _mm256_blendv_ps(minv, candidate, real);

        let passed = _mm256_cmp_ps::<_CMP_LE_OQ>(minv, onev);
        if _mm256_movemask_ps(passed) != 0 {
            return reduce_min(minv);
        }
    }

    let min_gamma_sq = reduce_min(minv);
    min_volume_scalar(
        doses,
        xs,
        ys,
        zs,
        chunks * LANES,
        dose_ref,
        xr,
        yr,
        zr,
        dd_norm_inv_sq,
        dta_inv_sq,
        min_gamma_sq,
    )
}

#[target_feature(enable = "avx2")]
unsafe fn reduce_min(v: std::arch::x86_64::__m256) -> f32 {
    let mut lanes = [0.0f32; LANES];
    std::arch::x86_64::_mm256_storeu_ps(lanes.as_mut_ptr(), v);
    // lanes are +inf or real minima, never NaN
    lanes.iter().fold(f32::INFINITY, |m, &v| if v < m { v } else { m })
}
