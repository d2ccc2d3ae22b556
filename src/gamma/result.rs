use derive_more::Deref;

use crate::image::ImageData;

/// The gamma field over the reference grid, plus derived statistics.
///
/// Shares the reference image's size, offset and spacing. Voxels are either a
/// non-negative gamma value or NaN (ineligible, or no evaluated sample in
/// range); all statistics ignore the NaN voxels. Derefs to [`ImageData`] for
/// the full set of reductions.
#[derive(Debug, Clone, PartialEq, Deref)]
pub struct GammaResult {
    image: ImageData,
}

impl GammaResult {
    pub(super) fn new(image: ImageData) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &ImageData {
        &self.image
    }

    pub fn into_image(self) -> ImageData {
        self.image
    }

    /// Fraction of non-NaN voxels with gamma ≤ 1. NaN when every voxel is NaN.
    pub fn passing_rate(&self) -> f32 {
        let passing = self.image.data().iter().filter(|v| **v <= 1.0).count();
        passing as f32 / self.image.nansize() as f32
    }

    /// Smallest gamma over the non-NaN voxels.
    pub fn min_gamma(&self) -> f32 {
        self.image.nanmin()
    }

    /// Largest gamma over the non-NaN voxels.
    pub fn max_gamma(&self) -> f32 {
        self.image.nanmax()
    }

    /// Mean gamma over the non-NaN voxels.
    pub fn mean_gamma(&self) -> f32 {
        self.image.nanmean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(values: Vec<f32>) -> GammaResult {
        let len = values.len() as u32;
        GammaResult::new(
            ImageData::new(values, (1, 1, len), (0.0, 0.0, 0.0), (0.0, 1.0, 1.0)).unwrap(),
        )
    }

    #[test]
    fn passing_rate_ignores_nan() {
        let r = result(vec![0.0, 0.5, 1.0, 2.0, f32::NAN, f32::NAN]);
        assert_eq!(r.passing_rate(), 0.75);
        assert_eq!(r.min_gamma(), 0.0);
        assert_eq!(r.max_gamma(), 2.0);
        assert_eq!(r.mean_gamma(), 0.875);
        assert_eq!(r.nansize(), 4);
    }

    #[test]
    fn all_nan_field() {
        let r = result(vec![f32::NAN, f32::NAN]);
        assert!(r.passing_rate().is_nan());
        assert_eq!(r.min_gamma(), f32::INFINITY);
    }

    #[test]
    fn deref_reaches_image_reductions() {
        let r = result(vec![0.2, 0.4]);
        assert_eq!(r.size().columns, 2);
        assert!((r.nanmean() - 0.3).abs() < 1e-6);
    }
}
