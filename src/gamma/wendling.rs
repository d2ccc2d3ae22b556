//! Search-radius gamma kernels.
//!
//! Instead of scanning the whole evaluated image, each reference voxel probes
//! a precomputed stencil of world-space offsets sorted by distance, sampling
//! the evaluated dose by on-the-fly linear interpolation. Because the stencil
//! distance is monotonic and the dose term is non-negative, the walk stops as
//! soon as the normalized squared distance alone can no longer beat the
//! running minimum.

use super::common::{dist_sq_1d, index_to_2d, index_to_3d, KernelConsts};
use crate::image::ImageData;

/// One in-plane stencil offset with its squared length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct PlanePoint {
    pub dy: f32,
    pub dx: f32,
    pub dist_sq: f32,
}

/// One volumetric stencil offset with its squared length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct VolumePoint {
    pub dz: f32,
    pub dy: f32,
    pub dx: f32,
    pub dist_sq: f32,
}

/// Every offset `(j*step, i*step)` with norm ≤ `radius`, once per sign
/// combination, sorted by squared distance ascending.
pub(super) fn sorted_points_in_circle(radius: f32, step: f32) -> Vec<PlanePoint> {
    let per_axis = (radius / step) as usize;
    // a little more than pi * n^2
    let mut points = Vec::with_capacity(4 * per_axis * per_axis + 8);

    let r_sq = radius * radius;
    let mut y = 0.0f32;
    while y <= radius {
        let mut x = 0.0f32;
        while x <= radius {
            let dist_sq = y * y + x * x;
            if dist_sq <= r_sq {
                points.push(PlanePoint { dy: y, dx: x, dist_sq });
                if y != 0.0 && x != 0.0 {
                    points.push(PlanePoint { dy: -y, dx: -x, dist_sq });
                }
                if y != 0.0 {
                    points.push(PlanePoint { dy: -y, dx: x, dist_sq });
                }
                if x != 0.0 {
                    points.push(PlanePoint { dy: y, dx: -x, dist_sq });
                }
            }
            x += step;
        }
        y += step;
    }

    points.sort_unstable_by(|a, b| a.dist_sq.total_cmp(&b.dist_sq));
    points
}

/// Every offset `(k*step, j*step, i*step)` with norm ≤ `radius`, once per
/// sign combination, sorted by squared distance ascending.
pub(super) fn sorted_points_in_sphere(radius: f32, step: f32) -> Vec<VolumePoint> {
    let per_axis = (radius / step) as usize;
    // a little more than 4/3 * pi * n^3
    let mut points = Vec::with_capacity(5 * per_axis * per_axis * per_axis + 16);

    let r_sq = radius * radius;
    let mut z = 0.0f32;
    while z <= radius {
        let mut y = 0.0f32;
        while y <= radius {
            let mut x = 0.0f32;
            while x <= radius {
                let dist_sq = z * z + y * y + x * x;
                if dist_sq <= r_sq {
                    points.push(VolumePoint { dz: z, dy: y, dx: x, dist_sq });
                    if z != 0.0 && y != 0.0 && x != 0.0 {
                        points.push(VolumePoint { dz: -z, dy: -y, dx: -x, dist_sq });
                    }
                    if z != 0.0 && y != 0.0 {
                        points.push(VolumePoint { dz: -z, dy: -y, dx: x, dist_sq });
                    }
                    if z != 0.0 && x != 0.0 {
                        points.push(VolumePoint { dz: -z, dy: y, dx: -x, dist_sq });
                    }
                    if y != 0.0 && x != 0.0 {
                        points.push(VolumePoint { dz: z, dy: -y, dx: -x, dist_sq });
                    }
                    if z != 0.0 {
                        points.push(VolumePoint { dz: -z, dy: y, dx: x, dist_sq });
                    }
                    if y != 0.0 {
                        points.push(VolumePoint { dz: z, dy: -y, dx: x, dist_sq });
                    }
                    if x != 0.0 {
                        points.push(VolumePoint { dz: z, dy: y, dx: -x, dist_sq });
                    }
                }
                x += step;
            }
            y += step;
        }
        z += step;
    }

    points.sort_unstable_by(|a, b| a.dist_sq.total_cmp(&b.dist_sq));
    points
}

pub(super) fn wendling_2d(
    ref_img: &ImageData,
    eval_img: &ImageData,
    consts: KernelConsts,
    points: &[PlanePoint],
    start: usize,
    end: usize,
    out: &mut [f32],
) {
    let ref_size = ref_img.size();
    let (ref_off, ref_sp) = (ref_img.offset(), ref_img.spacing());

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
                out[ind_ref - start] =
                    probe_plane(eval_img, 0, consts, points, dose_ref, yr, xr);
            }
            xr += ref_sp.columns;
            ind_ref += 1;
        }
        yr += ref_sp.rows;
    }
}

pub(super) fn wendling_2_5d(
    ref_img: &ImageData,
    eval_img: &ImageData,
    consts: KernelConsts,
    points: &[PlanePoint],
    frame_shift: i64,
    start: usize,
    end: usize,
    out: &mut [f32],
) {
    let ref_size = ref_img.size();
    let (ref_off, ref_sp) = (ref_img.offset(), ref_img.spacing());
    let eval_frames = i64::from(eval_img.size().frames);

    let (k_start, j_start, i_start) = index_to_3d(start, ref_size);

    let mut ind_ref = start;
    for kr in k_start..ref_size.frames {
        if ind_ref >= end {
            break;
        }
        let ke = i64::from(kr) + frame_shift;
        let frame_in_range = ke >= 0 && ke < eval_frames;

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
                    // frames with no counterpart in the evaluated image carry
                    // no value
                    out[ind_ref - start] = if frame_in_range {
                        let dose_ref = ref_img.get_flat(ind_ref);
                        probe_plane(eval_img, ke as u32, consts, points, dose_ref, yr, xr)
                    } else {
                        f32::NAN
                    };
                }
                xr += ref_sp.columns;
                ind_ref += 1;
            }
            yr += ref_sp.rows;
        }
    }
}

/// Walks the sorted stencil around one reference voxel, sampling the given
/// evaluated frame by inlined bilinear interpolation.
fn probe_plane(
    eval_img: &ImageData,
    frame: u32,
    consts: KernelConsts,
    points: &[PlanePoint],
    dose_ref: f32,
    yr: f32,
    xr: f32,
) -> f32 {
    let eval_size = eval_img.size();
    let (eval_off, eval_sp) = (eval_img.offset(), eval_img.spacing());
    let rows = i64::from(eval_size.rows);
    let columns = i64::from(eval_size.columns);
    let rows_sp_inv = 1.0 / eval_sp.rows;
    let columns_sp_inv = 1.0 / eval_sp.columns;

    let dd_norm_inv_sq = consts.dd_norm_inv_sq(dose_ref);
    let mut min_gamma_sq = f32::INFINITY;
    let mut any_in_range = false;

    for point in points {
        let normalized_dist_sq = point.dist_sq * consts.dta_inv_sq;
        if normalized_dist_sq >= min_gamma_sq {
            break;
        }

        let ye = yr + point.dy;
        let xe = xr + point.dx;

        let ty = (ye - eval_off.rows) * rows_sp_inv;
        let tx = (xe - eval_off.columns) * columns_sp_inv;
        let y0 = ty.floor() as i64;
        let x0 = tx.floor() as i64;
        let mut y1 = y0 + 1;
        let mut x1 = x0 + 1;

        if y0 >= 0 && y1 <= rows && x0 >= 0 && x1 <= columns {
            any_in_range = true;
            if y1 == rows {
                y1 = y0;
            }
            if x1 == columns {
                x1 = x0;
            }

            let yd = ty - y0 as f32;
            let xd = tx - x0 as f32;

            let c00 = eval_img.get(frame, y0 as u32, x0 as u32);
            let c01 = eval_img.get(frame, y0 as u32, x1 as u32);
            let c10 = eval_img.get(frame, y1 as u32, x0 as u32);
            let c11 = eval_img.get(frame, y1 as u32, x1 as u32);
            let c0 = c00 * (1.0 - xd) + c01 * xd;
            let c1 = c10 * (1.0 - xd) + c11 * xd;
            let dose_eval = c0 * (1.0 - yd) + c1 * yd;

            let gamma_sq =
                dist_sq_1d(dose_eval, dose_ref) * dd_norm_inv_sq + normalized_dist_sq;
            if gamma_sq < min_gamma_sq {
                min_gamma_sq = gamma_sq;
            }
        }
    }

    if any_in_range && min_gamma_sq.is_finite() {
        min_gamma_sq.sqrt()
    } else {
        f32::NAN
    }
}

pub(super) fn wendling_3d(
    ref_img: &ImageData,
    eval_img: &ImageData,
    consts: KernelConsts,
    points: &[VolumePoint],
    start: usize,
    end: usize,
    out: &mut [f32],
) {
    let ref_size = ref_img.size();
    let (ref_off, ref_sp) = (ref_img.offset(), ref_img.spacing());
    let eval_size = eval_img.size();
    let (eval_off, eval_sp) = (eval_img.offset(), eval_img.spacing());
    let frames = i64::from(eval_size.frames);
    let rows = i64::from(eval_size.rows);
    let columns = i64::from(eval_size.columns);
    let frames_sp_inv = 1.0 / eval_sp.frames;
    let rows_sp_inv = 1.0 / eval_sp.rows;
    let columns_sp_inv = 1.0 / eval_sp.columns;

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
                    let mut any_in_range = false;

                    for point in points {
                        let normalized_dist_sq = point.dist_sq * consts.dta_inv_sq;
                        if normalized_dist_sq >= min_gamma_sq {
                            break;
                        }

                        let ze = zr + point.dz;
                        let ye = yr + point.dy;
                        let xe = xr + point.dx;

                        let tz = (ze - eval_off.frames) * frames_sp_inv;
                        let ty = (ye - eval_off.rows) * rows_sp_inv;
                        let tx = (xe - eval_off.columns) * columns_sp_inv;
                        let z0 = tz.floor() as i64;
                        let y0 = ty.floor() as i64;
                        let x0 = tx.floor() as i64;
                        let mut z1 = z0 + 1;
                        let mut y1 = y0 + 1;
                        let mut x1 = x0 + 1;

                        if z0 >= 0
                            && z1 <= frames
                            && y0 >= 0
                            && y1 <= rows
                            && x0 >= 0
                            && x1 <= columns
                        {
                            any_in_range = true;
                            if z1 == frames {
                                z1 = z0;
                            }
                            if y1 == rows {
                                y1 = y0;
                            }
                            if x1 == columns {
                                x1 = x0;
                            }

                            let zd = tz - z0 as f32;
                            let yd = ty - y0 as f32;
                            let xd = tx - x0 as f32;
                            let (z0, z1, y0, y1, x0, x1) = (
                                z0 as u32, z1 as u32, y0 as u32, y1 as u32, x0 as u32, x1 as u32,
                            );

                            let c000 = eval_img.get(z0, y0, x0);
                            let c001 = eval_img.get(z1, y0, x0);
                            let c010 = eval_img.get(z0, y1, x0);
                            let c011 = eval_img.get(z1, y1, x0);
                            let c100 = eval_img.get(z0, y0, x1);
                            let c101 = eval_img.get(z1, y0, x1);
                            let c110 = eval_img.get(z0, y1, x1);
                            let c111 = eval_img.get(z1, y1, x1);

                            let c00 = c000 * (1.0 - xd) + c100 * xd;
                            let c01 = c001 * (1.0 - xd) + c101 * xd;
                            let c10 = c010 * (1.0 - xd) + c110 * xd;
                            let c11 = c011 * (1.0 - xd) + c111 * xd;
                            let c0 = c00 * (1.0 - yd) + c10 * yd;
                            let c1 = c01 * (1.0 - yd) + c11 * yd;
                            let dose_eval = c0 * (1.0 - zd) + c1 * zd;

                            let gamma_sq = dist_sq_1d(dose_eval, dose_ref) * dd_norm_inv_sq
                                + normalized_dist_sq;
                            if gamma_sq < min_gamma_sq {
                                min_gamma_sq = gamma_sq;
                            }
                        }
                    }

                    out[ind_ref - start] = if any_in_range && min_gamma_sq.is_finite() {
                        min_gamma_sq.sqrt()
                    } else {
                        f32::NAN
                    };
                }
                xr += ref_sp.columns;
                ind_ref += 1;
            }
            yr += ref_sp.rows;
        }
        zr += ref_sp.frames;
    }
}
