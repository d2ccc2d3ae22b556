use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};

mod data;

pub use data::ImageData;

/// Number of voxels along each axis, in frame-row-column order.
#[derive(Default, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub struct ImageSize {
    pub frames: u32,
    pub rows: u32,
    pub columns: u32,
}

impl fmt::Debug for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.frames, self.rows, self.columns)
    }
}

impl From<(u32, u32, u32)> for ImageSize {
    fn from(frc: (u32, u32, u32)) -> Self {
        Self { frames: frc.0, rows: frc.1, columns: frc.2 }
    }
}

impl ImageSize {
    /// Total number of voxels.
    pub const fn product(self) -> usize {
        self.frames as usize * self.rows as usize * self.columns as usize
    }

    pub const fn is_empty(self) -> bool {
        self.frames == 0 || self.rows == 0 || self.columns == 0
    }
}

/// World coordinates of voxel [0, 0, 0], in frame-row-column (z, y, x) order.
#[derive(Debug, Default, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct ImageOffset {
    pub frames: f32,
    pub rows: f32,
    pub columns: f32,
}

impl From<(f32, f32, f32)> for ImageOffset {
    fn from(zyx: (f32, f32, f32)) -> Self {
        Self { frames: zyx.0, rows: zyx.1, columns: zyx.2 }
    }
}

/// World units per index step along each axis, in frame-row-column (z, y, x)
/// order. A spacing of 0 marks a degenerate axis (e.g. the frame axis of a
/// single 2-D slice).
#[derive(Debug, Default, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct ImageSpacing {
    pub frames: f32,
    pub rows: f32,
    pub columns: f32,
}

impl From<(f32, f32, f32)> for ImageSpacing {
    fn from(zyx: (f32, f32, f32)) -> Self {
        Self { frames: zyx.0, rows: zyx.1, columns: zyx.2 }
    }
}

/// Anatomical viewing planes of an axis-aligned axial volume.
///
/// Axial is the native YX plane, Coronal the ZX plane, Sagittal the ZY plane.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePlane {
    Axial,
    Coronal,
    Sagittal,
}

/// Volume axes in storage order: Z walks frames, Y walks rows, X walks columns.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageAxis {
    Z,
    Y,
    X,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_product() {
        assert_eq!(ImageSize::from((2, 3, 4)).product(), 24);
        assert_eq!(ImageSize::from((0, 3, 4)).product(), 0);
        assert!(ImageSize::from((2, 0, 4)).is_empty());
        assert!(!ImageSize::from((1, 1, 1)).is_empty());
    }

    #[test]
    fn size_debug() {
        assert_eq!(format!("{:?}", ImageSize::from((2, 3, 4))), "2x3x4");
    }

    #[test]
    fn geometry_from_tuples() {
        let off = ImageOffset::from((1.0, -2.5, 0.0));
        assert_eq!(off.frames, 1.0);
        assert_eq!(off.rows, -2.5);
        let sp = ImageSpacing::from((3.0, 2.0, 1.0));
        assert_eq!(sp.columns, 1.0);
    }
}
