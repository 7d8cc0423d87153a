//! `kinfit` refits the four-momenta of a particle decay so that they conserve four-momentum and
//! reproduce the masses of the particles involved.
//!
//! Analyses often store four-momenta in single precision to save space. After reading them back,
//! the mother no longer equals the sum of its daughters and invariant masses are off by amounts
//! which are tiny in relative terms but large enough to spoil the kinematics of narrow states.
//! `kinfit` pulls the measured values back onto the constraint surface while moving each
//! component by no more than its single-precision round-off allows.
//!
//! # Table of Contents
//! - [Key Features](#key-features)
//! - [Quick Start](#quick-start)
//! - [Constraints](#constraints)
//! - [Batch Fitting](#batch-fitting)
//!
//! # Key Features
//! * Three-body ($`M \to d_1 d_2`$) and four-body ($`M \to d_1 d_2 X`$, with $`X`$ unmeasured)
//!   fits through a single [`MomentumRefitter`].
//! * Optional mass constraint on a "starred" composite of one daughter and the missing particle,
//!   with the daughter chosen automatically.
//! * A self-contained Householder [`QRDecomposition`] with pivoting that tolerates
//!   rank-deficient systems.
//! * Parallel batch fitting using [`rayon`](https://github.com/rayon-rs/rayon).
//!
//! # Quick Start
//! The decay $`B_s^0 \to D_s^{*-} \pi^+`$ with $`D_s^{*-} \to D_s^- \gamma`$, where the photon
//! was not reconstructed:
//! ```rust
//! use kinfit::prelude::*;
//!
//! let fitter = MomentumRefitter::new(
//!     FitterConfig::new(5366.3, 1968.49, 139.57018)
//!         .with_starred(2112.34)
//!         .with_missing(0.0),
//! )?;
//! assert_eq!(fitter.starred_partner(), Some(Daughter::First));
//!
//! let mut b = [229392.0625, -5512.819824, -1341.069946, 229259.09375];
//! let mut d = [182871.15625, -3216.939941, -2438.939941, 182815.984375];
//! let mut pi = [36441.722656, -2003.869995, 1146.180054, 36368.261719];
//! let mut gamma = [0.0; 4]; // seeded from four-momentum conservation
//!
//! let summary = fitter.fit_with_missing(&mut b, &mut d, &mut pi, &mut gamma)?;
//! assert_eq!(summary.dim, 16);
//! assert!((Vec4::from(b).m() - 5366.3).abs() < 5.0 * fitter.config().mother.sigma);
//! # Ok::<(), KinfitError>(())
//! ```
//!
//! # Constraints
//! Every particle takes a [`MassConstraint`] with a mass and an uncertainty. A negative
//! uncertainty asks the fitter to derive one from single-precision round-off of the largest
//! configured mass, and a negative mass (for the starred state and the missing particle) switches
//! the constraint off. The raw ten-number form of this configuration is available through
//! [`MomentumRefitter::from_masses`].
//!
//! Four-momentum conservation is always enforced, and the fit always stays as close to the
//! measured values as their precision permits. Failed fits return an error and never touch the
//! caller's arrays.
//!
//! # Batch Fitting
//! [`MomentumRefitter::fit_batch`] fits a slice of [`Candidate`]s in place. With the default
//! `rayon` feature the candidates are spread over the global thread pool; the outcomes come back
//! in input order either way.
#![warn(clippy::perf, clippy::style)]

/// The constrained refitter and its configuration.
pub mod fitter;

/// Dense linear algebra used by the refitter.
pub mod linalg {
    pub use kinfit_core::linalg::*;
}

/// Four-vectors and particle-slot enums.
pub mod utils {
    pub use kinfit_core::utils::*;
}

/// Commonly used types.
pub mod prelude {
    pub use crate::fitter::{
        Candidate, FitOutcome, FitSummary, FitterConfig, MassConstraint, MomentumRefitter,
    };
    pub use kinfit_core::{Daughter, KinfitError, KinfitResult, Slot, Vec4};
}

pub use crate::fitter::{
    Candidate, FitOutcome, FitSummary, FitterConfig, MassConstraint, MomentumRefitter,
    CONSERVATION_VARIANCE_SCALE, CONVERGENCE_THRESHOLD, MAX_ITERATIONS, MEASUREMENT_PRECISION,
    UNPHYSICAL_ENERGY, UNPHYSICAL_MASS2,
};
pub use kinfit_core::{
    Daughter, DenseMatrix, KinfitError, KinfitResult, MatrixLike, MatrixLikeMut,
    QRDecomposition, Slot, Vec4, VectorLike,
};
pub use serde::{Deserialize, Serialize};
