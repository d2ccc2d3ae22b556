//! Linear resampling of dose grids and single-point linear interpolation.
//!
//! Resampling is separable: the 2-D and 3-D routines are compositions of 1-D
//! along-axis passes, each of which produces a new volume sampled on a regular
//! grid clipped to the source extent. Point queries evaluate the canonical
//! corner-weighted blend at one fractional position.

use crate::error::{GammaError, Result};
use crate::image::{ImageAxis, ImageData, ImageOffset, ImagePlane, ImageSize, ImageSpacing};

/// Absorbs float round-off when mapping a resampled grid onto the source grid,
/// so that points landing on a source sample within this tolerance snap to it.
const GRID_TOLERANCE: f64 = 3e-6;

/// Resamples one axis to a new spacing, keeping that axis' origin.
pub fn linear_along_axis(img: &ImageData, spacing: f32, axis: ImageAxis) -> Result<ImageData> {
    resample_axis(img, None, spacing, axis)
}

/// Resamples one axis onto the regular grid `{grid_offset + n * spacing}`,
/// clipped to the source extent.
pub fn linear_along_axis_on_grid(
    img: &ImageData,
    grid_offset: f32,
    spacing: f32,
    axis: ImageAxis,
) -> Result<ImageData> {
    resample_axis(img, Some(grid_offset), spacing, axis)
}

/// Resamples one axis of `img` onto the grid the reference image uses for
/// that axis.
pub fn linear_along_axis_like(
    img: &ImageData,
    reference: &ImageData,
    axis: ImageAxis,
) -> Result<ImageData> {
    let (offset, spacing) = match axis {
        ImageAxis::Z => (reference.offset().frames, reference.spacing().frames),
        ImageAxis::Y => (reference.offset().rows, reference.spacing().rows),
        ImageAxis::X => (reference.offset().columns, reference.spacing().columns),
    };
    resample_axis(img, Some(offset), spacing, axis)
}

const fn plane_axes(plane: ImagePlane) -> (ImageAxis, ImageAxis) {
    match plane {
        ImagePlane::Axial => (ImageAxis::Y, ImageAxis::X),
        ImagePlane::Coronal => (ImageAxis::Z, ImageAxis::X),
        ImagePlane::Sagittal => (ImageAxis::Z, ImageAxis::Y),
    }
}

/// Bilinear resampling on a plane: two composed 1-D passes over the plane's
/// in-plane axes.
pub fn bilinear_on_plane(
    img: &ImageData,
    first_spacing: f32,
    second_spacing: f32,
    plane: ImagePlane,
) -> Result<ImageData> {
    let (first, second) = plane_axes(plane);
    resample_axis(&resample_axis(img, None, first_spacing, first)?, None, second_spacing, second)
}

/// Bilinear resampling onto the in-plane grid of the reference image.
pub fn bilinear_on_plane_like(
    img: &ImageData,
    reference: &ImageData,
    plane: ImagePlane,
) -> Result<ImageData> {
    let (first, second) = plane_axes(plane);
    linear_along_axis_like(&linear_along_axis_like(img, reference, first)?, reference, second)
}

/// Trilinear resampling: three composed 1-D passes (Z, then Y, then X).
pub fn trilinear(img: &ImageData, spacing: impl Into<ImageSpacing>) -> Result<ImageData> {
    let spacing = spacing.into();
    let z = resample_axis(img, None, spacing.frames, ImageAxis::Z)?;
    let zy = resample_axis(&z, None, spacing.rows, ImageAxis::Y)?;
    resample_axis(&zy, None, spacing.columns, ImageAxis::X)
}

/// Trilinear resampling onto the regular grid anchored at `offset`.
pub fn trilinear_on_grid(
    img: &ImageData,
    offset: impl Into<ImageOffset>,
    spacing: impl Into<ImageSpacing>,
) -> Result<ImageData> {
    let (offset, spacing) = (offset.into(), spacing.into());
    let z = resample_axis(img, Some(offset.frames), spacing.frames, ImageAxis::Z)?;
    let zy = resample_axis(&z, Some(offset.rows), spacing.rows, ImageAxis::Y)?;
    resample_axis(&zy, Some(offset.columns), spacing.columns, ImageAxis::X)
}

/// Trilinear resampling onto the reference image's grid.
pub fn trilinear_like(img: &ImageData, reference: &ImageData) -> Result<ImageData> {
    trilinear_on_grid(img, reference.offset(), reference.spacing())
}

/// Bilinear interpolation at one in-plane point of the given frame.
///
/// Returns `None` when the point lies outside the frame's extent. A point
/// exactly on the far edge succeeds: the upper neighbor collapses onto the
/// last sample.
pub fn bilinear_at_point(img: &ImageData, frame: u32, y: f32, x: f32) -> Option<f32> {
    let ImageSize { frames, rows, columns } = img.size();
    let (off, sp) = (img.offset(), img.spacing());
    if frame >= frames || sp.rows <= 0.0 || sp.columns <= 0.0 {
        return None;
    }

    let ty = (y - off.rows) / sp.rows;
    let tx = (x - off.columns) / sp.columns;
    let y0 = ty.floor() as i64;
    let x0 = tx.floor() as i64;
    let mut y1 = y0 + 1;
    let mut x1 = x0 + 1;
    if y0 < 0 || y1 > i64::from(rows) || x0 < 0 || x1 > i64::from(columns) {
        return None;
    }
    if y1 == i64::from(rows) {
        y1 = y0;
    }
    if x1 == i64::from(columns) {
        x1 = x0;
    }

    let yd = ty - y0 as f32;
    let xd = tx - x0 as f32;
    let (y0, y1, x0, x1) = (y0 as u32, y1 as u32, x0 as u32, x1 as u32);

    let c00 = img.get(frame, y0, x0);
    let c01 = img.get(frame, y0, x1);
    let c10 = img.get(frame, y1, x0);
    let c11 = img.get(frame, y1, x1);

    let c0 = c00 * (1.0 - xd) + c01 * xd;
    let c1 = c10 * (1.0 - xd) + c11 * xd;
    Some(c0 * (1.0 - yd) + c1 * yd)
}

/// Trilinear interpolation at one world point.
///
/// Returns `None` when the point lies outside the volume's extent; far-edge
/// points succeed through the same upper-neighbor collapse as
/// [`bilinear_at_point`].
pub fn trilinear_at_point(img: &ImageData, z: f32, y: f32, x: f32) -> Option<f32> {
    let ImageSize { frames, rows, columns } = img.size();
    let (off, sp) = (img.offset(), img.spacing());
    if sp.frames <= 0.0 || sp.rows <= 0.0 || sp.columns <= 0.0 {
        return None;
    }

    let tz = (z - off.frames) / sp.frames;
    let ty = (y - off.rows) / sp.rows;
    let tx = (x - off.columns) / sp.columns;
    let z0 = tz.floor() as i64;
    let y0 = ty.floor() as i64;
    let x0 = tx.floor() as i64;
    let mut z1 = z0 + 1;
    let mut y1 = y0 + 1;
    let mut x1 = x0 + 1;
    if z0 < 0
        || z1 > i64::from(frames)
        || y0 < 0
        || y1 > i64::from(rows)
        || x0 < 0
        || x1 > i64::from(columns)
    {
        return None;
    }
    if z1 == i64::from(frames) {
        z1 = z0;
    }
    if y1 == i64::from(rows) {
        y1 = y0;
    }
    if x1 == i64::from(columns) {
        x1 = x0;
    }

    let zd = tz - z0 as f32;
    let yd = ty - y0 as f32;
    let xd = tx - x0 as f32;
    let (z0, z1, y0, y1, x0, x1) = (z0 as u32, z1 as u32, y0 as u32, y1 as u32, x0 as u32, x1 as u32);

    let c000 = img.get(z0, y0, x0);
    let c001 = img.get(z1, y0, x0);
    let c010 = img.get(z0, y1, x0);
    let c011 = img.get(z1, y1, x0);
    let c100 = img.get(z0, y0, x1);
    let c101 = img.get(z1, y0, x1);
    let c110 = img.get(z0, y1, x1);
    let c111 = img.get(z1, y1, x1);

    let c00 = c000 * (1.0 - xd) + c100 * xd;
    let c01 = c001 * (1.0 - xd) + c101 * xd;
    let c10 = c010 * (1.0 - xd) + c110 * xd;
    let c11 = c011 * (1.0 - xd) + c111 * xd;

    let c0 = c00 * (1.0 - yd) + c10 * yd;
    let c1 = c01 * (1.0 - yd) + c11 * yd;
    Some(c0 * (1.0 - zd) + c1 * zd)
}

fn resample_axis(
    img: &ImageData,
    grid_offset: Option<f32>,
    spacing: f32,
    axis: ImageAxis,
) -> Result<ImageData> {
    if spacing <= 0.0 {
        return Err(GammaError::InvalidParameter(format!(
            "interpolation spacing along {axis} must be positive (got {spacing})"
        )));
    }

    let size = img.size();
    let (old_len, old_spacing, old_offset) = match axis {
        ImageAxis::Z => (size.frames, img.spacing().frames, img.offset().frames),
        ImageAxis::Y => (size.rows, img.spacing().rows, img.offset().rows),
        ImageAxis::X => (size.columns, img.spacing().columns, img.offset().columns),
    };
    if old_len > 1 && old_spacing <= 0.0 {
        return Err(GammaError::InvalidParameter(format!(
            "cannot resample along degenerate axis {axis} (spacing {old_spacing})"
        )));
    }

    // Snap the new origin to the closest target grid point at or above the old
    // origin.
    let new_axis_offset = match grid_offset {
        Some(grid) => {
            let steps = ((f64::from(old_offset) - f64::from(grid)) / f64::from(spacing)
                - GRID_TOLERANCE)
                .ceil();
            grid + steps as f32 * spacing
        }
        None => old_offset,
    };
    let offset_rel = new_axis_offset - old_offset;

    if offset_rel == 0.0 && spacing == old_spacing {
        return Ok(img.clone());
    }

    let new_len = if old_len == 0 {
        0
    } else {
        let span = f64::from(old_spacing) * f64::from(old_len - 1) - f64::from(offset_rel);
        let count = (span / f64::from(spacing) + 1.0 + GRID_TOLERANCE).floor();
        if count > 0.0 { count as u32 } else { 0 }
    };

    let (new_size, new_offset, new_spacing) = reshape(img, axis, new_len, new_axis_offset, spacing);
    let mut out = vec![0.0f32; new_size.product()];

    // Line iteration strides over the two non-resampled axes.
    let (frames, rows, columns) =
        (size.frames as usize, size.rows as usize, size.columns as usize);
    let nl = new_len as usize;
    let (n1, n2, in_s1, in_s2, in_step, out_s1, out_s2, out_step) = match axis {
        ImageAxis::Z => (rows, columns, columns, 1, rows * columns, columns, 1, rows * columns),
        ImageAxis::Y => (frames, columns, rows * columns, 1, columns, nl * columns, 1, columns),
        ImageAxis::X => (frames, rows, rows * columns, columns, 1, rows * nl, nl, 1),
    };

    for a in 0..n1 {
        for b in 0..n2 {
            resample_line(
                img.data(),
                a * in_s1 + b * in_s2,
                in_step,
                old_len as usize,
                &mut out,
                a * out_s1 + b * out_s2,
                out_step,
                nl,
                offset_rel,
                old_spacing,
                spacing,
            );
        }
    }

    ImageData::new(out, new_size, new_offset, new_spacing)
}

fn reshape(
    img: &ImageData,
    axis: ImageAxis,
    new_len: u32,
    new_axis_offset: f32,
    new_axis_spacing: f32,
) -> (ImageSize, ImageOffset, ImageSpacing) {
    let mut size = img.size();
    let mut offset = img.offset();
    let mut spacing = img.spacing();
    match axis {
        ImageAxis::Z => {
            size.frames = new_len;
            offset.frames = new_axis_offset;
            spacing.frames = new_axis_spacing;
        }
        ImageAxis::Y => {
            size.rows = new_len;
            offset.rows = new_axis_offset;
            spacing.rows = new_axis_spacing;
        }
        ImageAxis::X => {
            size.columns = new_len;
            offset.columns = new_axis_offset;
            spacing.columns = new_axis_spacing;
        }
    }
    (size, offset, spacing)
}

#[allow(clippy::too_many_arguments)]
fn resample_line(
    src: &[f32],
    src_base: usize,
    src_step: usize,
    src_len: usize,
    dst: &mut [f32],
    dst_base: usize,
    dst_step: usize,
    dst_len: usize,
    offset_rel: f32,
    old_spacing: f32,
    spacing: f32,
) {
    if dst_len == 0 || src_len == 0 {
        return;
    }
    if src_len == 1 {
        // Degenerate axis: only replication is possible.
        for k in 0..dst_len {
            dst[dst_base + k * dst_step] = src[src_base];
        }
        return;
    }

    if 2.0 * spacing < old_spacing {
        // Fine target grid: advance the source segment only when the target
        // position crosses it.
        let mut ind = (offset_rel / old_spacing) as usize;
        let mut seg_start = ind as f32 * old_spacing;
        let mut pos = offset_rel;
        let mut k = 0;
        while k < dst_len {
            let v1 = src[src_base + ind * src_step];
            if ind + 1 < src_len {
                let v2 = src[src_base + (ind + 1) * src_step];
                let slope = (v2 - v1) / old_spacing;
                while pos < seg_start + old_spacing && k < dst_len {
                    dst[dst_base + k * dst_step] = v1 + (pos - seg_start) * slope;
                    pos += spacing;
                    k += 1;
                }
            } else {
                while k < dst_len {
                    dst[dst_base + k * dst_step] = v1;
                    k += 1;
                }
            }
            seg_start += old_spacing;
            ind += 1;
        }
    } else {
        let mut pos = offset_rel;
        for k in 0..dst_len {
            let t = pos / old_spacing;
            let ind = (t as usize).min(src_len - 1);
            let v1 = src[src_base + ind * src_step];
            dst[dst_base + k * dst_step] = if ind + 1 < src_len {
                let v2 = src[src_base + (ind + 1) * src_step];
                v1 + (t - ind as f32) * (v2 - v1)
            } else {
                v1
            };
            pos += spacing;
        }
    }
}
