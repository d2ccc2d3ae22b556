use super::{ImageOffset, ImagePlane, ImageSize, ImageSpacing};
use crate::error::{GammaError, Result};

/// A dense 3-D grid of 32-bit dose samples together with its grid geometry.
///
/// Samples are stored in frame-major order: `get(k, j, i)` reads
/// `data[(k * rows + j) * columns + i]`. The world coordinate of voxel
/// `(k, j, i)` is `offset + (k, j, i) * spacing`, component-wise; axes are
/// axis-aligned and spacing is uniform per axis. NaN is a legal sample value
/// meaning "no value here".
///
/// The buffer is exclusively owned and immutable from the kernels' point of
/// view; slicing operations copy out.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    data: Vec<f32>,
    size: ImageSize,
    offset: ImageOffset,
    spacing: ImageSpacing,
}

impl ImageData {
    /// Wraps an owned buffer. Fails with [`GammaError::InvalidSize`] when the
    /// buffer length does not equal the product of the dimensions.
    pub fn new(
        data: Vec<f32>,
        size: impl Into<ImageSize>,
        offset: impl Into<ImageOffset>,
        spacing: impl Into<ImageSpacing>,
    ) -> Result<Self> {
        let size = size.into();
        if data.len() != size.product() {
            return Err(GammaError::InvalidSize(format!(
                "buffer holds {} elements but size {size:?} requires {}",
                data.len(),
                size.product()
            )));
        }
        Ok(Self { data, size, offset: offset.into(), spacing: spacing.into() })
    }

    pub const fn size(&self) -> ImageSize {
        self.size
    }

    pub const fn offset(&self) -> ImageOffset {
        self.offset
    }

    pub const fn spacing(&self) -> ImageSpacing {
        self.spacing
    }

    /// Total number of voxels.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Reinterprets the buffer under new dimensions. Fails with
    /// [`GammaError::InvalidSize`] unless the element count is unchanged.
    pub fn set_size(&mut self, size: impl Into<ImageSize>) -> Result<()> {
        let size = size.into();
        if size.product() != self.size.product() {
            return Err(GammaError::InvalidSize(format!(
                "cannot resize {:?} to {size:?}: element counts differ",
                self.size
            )));
        }
        self.size = size;
        Ok(())
    }

    pub fn set_offset(&mut self, offset: impl Into<ImageOffset>) {
        self.offset = offset.into();
    }

    pub fn set_spacing(&mut self, spacing: impl Into<ImageSpacing>) {
        self.spacing = spacing.into();
    }

    /// Bounds-checked access.
    pub fn at(&self, frame: u32, row: u32, column: u32) -> Result<f32> {
        if frame >= self.size.frames || row >= self.size.rows || column >= self.size.columns {
            return Err(GammaError::OutOfRange(format!(
                "index [{frame}, {row}, {column}] outside image of size {:?}",
                self.size
            )));
        }
        Ok(self.get(frame, row, column))
    }

    /// Unchecked access; the caller guarantees the indices are in range.
    #[inline]
    pub fn get(&self, frame: u32, row: u32, column: u32) -> f32 {
        self.data[self.flat_index(frame, row, column)]
    }

    /// Unchecked access by flat index.
    #[inline]
    pub fn get_flat(&self, index: usize) -> f32 {
        self.data[index]
    }

    #[inline]
    pub fn flat_index(&self, frame: u32, row: u32, column: u32) -> usize {
        (frame as usize * self.size.rows as usize + row as usize) * self.size.columns as usize
            + column as usize
    }

    /// Copies out a single 2-D slice perpendicular to the given plane.
    ///
    /// The result has `frames == 1`; its first offset component is the world
    /// coordinate of the slicing plane and its first spacing component is 0.
    /// For Coronal the in-plane ordering is (frames, columns), for Sagittal
    /// (frames, rows).
    pub fn slice_2d(&self, index: u32, plane: ImagePlane) -> Result<Self> {
        let ImageSize { frames, rows, columns } = self.size;
        let limit = match plane {
            ImagePlane::Axial => frames,
            ImagePlane::Coronal => rows,
            ImagePlane::Sagittal => columns,
        };
        if index >= limit {
            return Err(GammaError::OutOfRange(format!(
                "{plane} slice {index} outside image of size {:?}",
                self.size
            )));
        }

        let (data, size, offset, spacing) = match plane {
            ImagePlane::Axial => {
                let base = self.flat_index(index, 0, 0);
                let data = self.data[base..base + rows as usize * columns as usize].to_vec();
                (
                    data,
                    (1, rows, columns),
                    (
                        self.offset.frames + index as f32 * self.spacing.frames,
                        self.offset.rows,
                        self.offset.columns,
                    ),
                    (0.0, self.spacing.rows, self.spacing.columns),
                )
            }
            ImagePlane::Coronal => {
                let mut data = Vec::with_capacity(frames as usize * columns as usize);
                for z in 0..frames {
                    for x in 0..columns {
                        data.push(self.get(z, index, x));
                    }
                }
                (
                    data,
                    (1, frames, columns),
                    (
                        self.offset.rows + index as f32 * self.spacing.rows,
                        self.offset.frames,
                        self.offset.columns,
                    ),
                    (0.0, self.spacing.frames, self.spacing.columns),
                )
            }
            ImagePlane::Sagittal => {
                let mut data = Vec::with_capacity(frames as usize * rows as usize);
                for z in 0..frames {
                    for y in 0..rows {
                        data.push(self.get(z, y, index));
                    }
                }
                (
                    data,
                    (1, frames, rows),
                    (
                        self.offset.columns + index as f32 * self.spacing.columns,
                        self.offset.frames,
                        self.offset.rows,
                    ),
                    (0.0, self.spacing.frames, self.spacing.rows),
                )
            }
        };

        Self::new(data, size, offset, spacing)
    }

    /// Copies out the whole volume reoriented to the given plane.
    ///
    /// Axial returns the volume unchanged. Coronal reorders storage to
    /// (rows, frames, columns), Sagittal to (columns, frames, rows); offset
    /// and spacing are permuted consistently.
    pub fn slice_3d(&self, plane: ImagePlane) -> Self {
        let ImageSize { frames, rows, columns } = self.size;
        match plane {
            ImagePlane::Axial => self.clone(),
            ImagePlane::Coronal => {
                let mut data = Vec::with_capacity(self.data.len());
                for y in 0..rows {
                    for z in 0..frames {
                        for x in 0..columns {
                            data.push(self.get(z, y, x));
                        }
                    }
                }
                Self {
                    data,
                    size: ImageSize { frames: rows, rows: frames, columns },
                    offset: ImageOffset {
                        frames: self.offset.rows,
                        rows: self.offset.frames,
                        columns: self.offset.columns,
                    },
                    spacing: ImageSpacing {
                        frames: self.spacing.rows,
                        rows: self.spacing.frames,
                        columns: self.spacing.columns,
                    },
                }
            }
            ImagePlane::Sagittal => {
                let mut data = Vec::with_capacity(self.data.len());
                for x in 0..columns {
                    for z in 0..frames {
                        for y in 0..rows {
                            data.push(self.get(z, y, x));
                        }
                    }
                }
                Self {
                    data,
                    size: ImageSize { frames: columns, rows: frames, columns: rows },
                    offset: ImageOffset {
                        frames: self.offset.columns,
                        rows: self.offset.frames,
                        columns: self.offset.rows,
                    },
                    spacing: ImageSpacing {
                        frames: self.spacing.columns,
                        rows: self.spacing.frames,
                        columns: self.spacing.rows,
                    },
                }
            }
        }
    }

    /// Smallest sample. Empty volumes yield +∞; NaN samples are never selected
    /// unless every sample is NaN.
    pub fn min(&self) -> f32 {
        self.data.iter().fold(f32::INFINITY, |m, &v| if v < m { v } else { m })
    }

    /// Largest sample. Empty volumes yield −∞.
    pub fn max(&self) -> f32 {
        self.data.iter().fold(f32::NEG_INFINITY, |m, &v| if v > m { v } else { m })
    }

    /// Sum over all samples, accumulated in f64. Empty volumes yield 0.
    pub fn sum(&self) -> f32 {
        self.data.iter().map(|&v| f64::from(v)).sum::<f64>() as f32
    }

    /// Mean over all samples. Empty volumes yield NaN.
    pub fn mean(&self) -> f32 {
        (self.data.iter().map(|&v| f64::from(v)).sum::<f64>() / self.data.len() as f64) as f32
    }

    /// Population variance over all samples. Empty volumes yield NaN.
    pub fn var(&self) -> f32 {
        let mean = f64::from(self.mean());
        let sq = self
            .data
            .iter()
            .map(|&v| {
                let d = f64::from(v) - mean;
                d * d
            })
            .sum::<f64>();
        (sq / self.data.len() as f64) as f32
    }

    /// Smallest non-NaN sample; +∞ when there is none.
    pub fn nanmin(&self) -> f32 {
        self.data
            .iter()
            .filter(|v| !v.is_nan())
            .fold(f32::INFINITY, |m, &v| if v < m { v } else { m })
    }

    /// Largest non-NaN sample; −∞ when there is none.
    pub fn nanmax(&self) -> f32 {
        self.data
            .iter()
            .filter(|v| !v.is_nan())
            .fold(f32::NEG_INFINITY, |m, &v| if v > m { v } else { m })
    }

    /// Sum over non-NaN samples, accumulated in f64.
    pub fn nansum(&self) -> f32 {
        self.data
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| f64::from(v))
            .sum::<f64>() as f32
    }

    /// Mean over non-NaN samples. NaN when every sample is NaN.
    pub fn nanmean(&self) -> f32 {
        (self
            .data
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| f64::from(v))
            .sum::<f64>()
            / self.nansize() as f64) as f32
    }

    /// Population variance over non-NaN samples. NaN when every sample is NaN.
    pub fn nanvar(&self) -> f32 {
        let mean = f64::from(self.nanmean());
        let sq = self
            .data
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| {
                let d = f64::from(v) - mean;
                d * d
            })
            .sum::<f64>();
        (sq / self.nansize() as f64) as f32
    }

    /// Number of non-NaN samples.
    pub fn nansize(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    pub fn contains_nan(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }

    pub fn contains_inf(&self) -> bool {
        self.data.iter().any(|v| v.is_infinite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> ImageData {
        // 2 frames x 2 rows x 3 columns, values 0..12
        let data = (0..12).map(|v| v as f32).collect();
        ImageData::new(data, (2, 2, 3), (10.0, 20.0, 30.0), (1.0, 2.0, 3.0)).unwrap()
    }

    #[test]
    fn new_rejects_bad_length() {
        let err = ImageData::new(vec![0.0; 5], (2, 2, 3), (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
        assert!(matches!(err, Err(GammaError::InvalidSize(_))));
    }

    #[test]
    fn storage_order() {
        let img = volume();
        assert_eq!(img.get(0, 0, 0), 0.0);
        assert_eq!(img.get(0, 0, 2), 2.0);
        assert_eq!(img.get(0, 1, 0), 3.0);
        assert_eq!(img.get(1, 0, 0), 6.0);
        assert_eq!(img.get(1, 1, 2), 11.0);
        assert_eq!(img.get_flat(7), 7.0);
        assert_eq!(img.flat_index(1, 1, 2), 11);
    }

    #[test]
    fn checked_access() {
        let img = volume();
        assert_eq!(img.at(1, 1, 2).unwrap(), 11.0);
        assert!(matches!(img.at(2, 0, 0), Err(GammaError::OutOfRange(_))));
        assert!(matches!(img.at(0, 2, 0), Err(GammaError::OutOfRange(_))));
        assert!(matches!(img.at(0, 0, 3), Err(GammaError::OutOfRange(_))));
    }

    #[test]
    fn set_size_checks_product() {
        let mut img = volume();
        img.set_size((3, 2, 2)).unwrap();
        assert_eq!(img.size(), ImageSize::from((3, 2, 2)));
        assert!(matches!(img.set_size((2, 2, 2)), Err(GammaError::InvalidSize(_))));
    }

    #[test]
    fn axial_slice() {
        let img = volume();
        let slice = img.slice_2d(1, ImagePlane::Axial).unwrap();
        assert_eq!(slice.size(), ImageSize::from((1, 2, 3)));
        assert_eq!(slice.data(), &[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
        assert_eq!(slice.offset(), ImageOffset::from((11.0, 20.0, 30.0)));
        assert_eq!(slice.spacing(), ImageSpacing::from((0.0, 2.0, 3.0)));
    }

    #[test]
    fn coronal_slice() {
        let img = volume();
        let slice = img.slice_2d(1, ImagePlane::Coronal).unwrap();
        assert_eq!(slice.size(), ImageSize::from((1, 2, 3)));
        // row 1 of each frame
        assert_eq!(slice.data(), &[3.0, 4.0, 5.0, 9.0, 10.0, 11.0]);
        assert_eq!(slice.offset(), ImageOffset::from((22.0, 10.0, 30.0)));
        assert_eq!(slice.spacing(), ImageSpacing::from((0.0, 1.0, 3.0)));
    }

    #[test]
    fn sagittal_slice() {
        let img = volume();
        let slice = img.slice_2d(2, ImagePlane::Sagittal).unwrap();
        assert_eq!(slice.size(), ImageSize::from((1, 2, 2)));
        // column 2 of every (frame, row)
        assert_eq!(slice.data(), &[2.0, 5.0, 8.0, 11.0]);
        assert_eq!(slice.offset(), ImageOffset::from((36.0, 10.0, 20.0)));
        assert_eq!(slice.spacing(), ImageSpacing::from((0.0, 1.0, 2.0)));
    }

    #[test]
    fn slice_2d_bounds() {
        let img = volume();
        assert!(img.slice_2d(2, ImagePlane::Axial).is_err());
        assert!(img.slice_2d(2, ImagePlane::Coronal).is_err());
        assert!(img.slice_2d(3, ImagePlane::Sagittal).is_err());
    }

    #[test]
    fn reoriented_volumes() {
        let img = volume();

        let coronal = img.slice_3d(ImagePlane::Coronal);
        assert_eq!(coronal.size(), ImageSize::from((2, 2, 3)));
        assert_eq!(coronal.offset(), ImageOffset::from((20.0, 10.0, 30.0)));
        assert_eq!(coronal.spacing(), ImageSpacing::from((2.0, 1.0, 3.0)));
        // (y, z, x) ordering
        assert_eq!(coronal.get(1, 0, 2), img.get(0, 1, 2));
        assert_eq!(coronal.get(0, 1, 1), img.get(1, 0, 1));

        let sagittal = img.slice_3d(ImagePlane::Sagittal);
        assert_eq!(sagittal.size(), ImageSize::from((3, 2, 2)));
        assert_eq!(sagittal.offset(), ImageOffset::from((30.0, 10.0, 20.0)));
        assert_eq!(sagittal.spacing(), ImageSpacing::from((3.0, 1.0, 2.0)));
        // (x, z, y) ordering
        assert_eq!(sagittal.get(2, 1, 0), img.get(1, 0, 2));
        assert_eq!(sagittal.get(0, 0, 1), img.get(0, 1, 0));

        assert_eq!(img.slice_3d(ImagePlane::Axial), img);
    }

    #[test]
    fn reductions() {
        let img = volume();
        assert_eq!(img.min(), 0.0);
        assert_eq!(img.max(), 11.0);
        assert_eq!(img.sum(), 66.0);
        assert_eq!(img.mean(), 5.5);
        let var = img.var();
        assert!((var - 11.9583333).abs() < 1e-4);
        assert!(!img.contains_nan());
        assert!(!img.contains_inf());
    }

    #[test]
    fn nan_aware_reductions() {
        let data = vec![1.0, f32::NAN, 3.0, f32::NAN];
        let img = ImageData::new(data, (1, 2, 2), (0.0, 0.0, 0.0), (0.0, 1.0, 1.0)).unwrap();
        assert_eq!(img.nansize(), 2);
        assert_eq!(img.nanmin(), 1.0);
        assert_eq!(img.nanmax(), 3.0);
        assert_eq!(img.nansum(), 4.0);
        assert_eq!(img.nanmean(), 2.0);
        assert_eq!(img.nanvar(), 1.0);
        assert!(img.contains_nan());
        assert!(img.mean().is_nan());
    }

    #[test]
    fn empty_reduction_conventions() {
        let img = ImageData::new(vec![], (0, 0, 0), (0.0, 0.0, 0.0), (1.0, 1.0, 1.0)).unwrap();
        assert_eq!(img.min(), f32::INFINITY);
        assert_eq!(img.max(), f32::NEG_INFINITY);
        assert_eq!(img.sum(), 0.0);
        assert!(img.mean().is_nan());
        assert_eq!(img.nansize(), 0);
    }

    #[test]
    fn infinity_detection() {
        let img =
            ImageData::new(vec![1.0, f32::INFINITY], (1, 1, 2), (0.0, 0.0, 0.0), (0.0, 1.0, 1.0))
                .unwrap();
        assert!(img.contains_inf());
        assert!(!img.contains_nan());
    }
}
