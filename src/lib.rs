//! Gamma index computation engine for comparing radiation dose distributions.
//!
//! For every voxel of a reference dose image, the gamma index is the minimum
//! over the evaluated image of the combined dose-difference (DD) and
//! distance-to-agreement (DTA) criterion; a voxel "passes" when its gamma is
//! at most 1. Two search strategies are provided for 2-D, 2.5-D and 3-D
//! grids: the exhaustive classic kernel and the search-radius Wendling
//! kernel, each runnable sequentially, thread-parallel, and (for the classic
//! kernels on x86_64) with a lane-parallel inner loop.
//!
//! All execution policies agree on the pass/fail verdict of every voxel.
//! Sequential and Threaded produce identical values; the vectorized policies
//! may return any value ≤ 1 for a passing voxel (the lane loop stops once a
//! voxel has passed) and agree within a few ULP elsewhere.
//!
//! ```
//! use gamma_index::{gamma_index_2d, GammaNormalization, GammaParameters, ImageData};
//!
//! let reference =
//!     ImageData::new(vec![1.0, 1.0, 3.0, 2.0], (1, 2, 2), (0.0, 0.0, 0.0), (0.0, 2.0, 2.0))?;
//! let evaluated =
//!     ImageData::new(vec![2.0, 1.0, 2.0, 3.0], (1, 2, 2), (0.0, 0.0, 0.0), (0.0, 2.0, 2.0))?;
//!
//! let params = GammaParameters {
//!     dd_threshold: 3.0,
//!     dta_threshold: 3.0,
//!     normalization: GammaNormalization::Global,
//!     global_norm_dose: reference.max(),
//!     dose_cutoff: 0.0,
//!     max_search_distance: 10.0,
//!     step_size: 1.0,
//! };
//!
//! let result = gamma_index_2d(&reference, &evaluated, &params)?;
//! assert_eq!(result.passing_rate(), 1.0);
//! # Ok::<(), gamma_index::GammaError>(())
//! ```

#[macro_use]
extern crate log;

mod error;
mod exec;
mod gamma;
pub mod image;
pub mod interpolation;

pub use error::{GammaError, Result};
pub use exec::ExecutionPolicy;
pub use gamma::{
    gamma_index_2_5d, gamma_index_2_5d_wendling, gamma_index_2_5d_wendling_with_policy,
    gamma_index_2_5d_with_policy, gamma_index_2d, gamma_index_2d_wendling,
    gamma_index_2d_wendling_with_policy, gamma_index_2d_with_policy, gamma_index_3d,
    gamma_index_3d_wendling, gamma_index_3d_wendling_with_policy, gamma_index_3d_with_policy,
    GammaNormalization, GammaParameters, GammaResult,
};
pub use image::{ImageAxis, ImageData, ImageOffset, ImagePlane, ImageSize, ImageSpacing};
