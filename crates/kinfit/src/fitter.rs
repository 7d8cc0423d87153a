use kinfit_core::{
    utils::vectors::E, Daughter, DenseMatrix, KinfitError, KinfitResult, QRDecomposition, Slot,
    Vec4,
};
use log::{debug, trace, warn};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Default iteration limit of a fit.
pub const MAX_ITERATIONS: usize = 1024;

/// Relative precision of a four-momentum component stored in single precision. Measured
/// components are trusted to this relative accuracy, and mass constraints without an explicit
/// uncertainty use it times the largest configured mass.
pub const MEASUREMENT_PRECISION: f64 = f32::EPSILON as f64;

/// Scale of the variance of the four-momentum conservation constraint, relative to the squared
/// measured momenta. Tight enough to enforce conservation to the last ~16 bits of a double,
/// loose enough to keep the system solvable.
pub const CONSERVATION_VARIANCE_SCALE: f64 = 65536.0 * f64::EPSILON * f64::EPSILON;

/// A correction is small enough to stop iterating when it is below this threshold, either
/// absolutely or relative to the corrected component.
///
/// This is an empirically tuned value (the last ~16 bits of the mantissa), not a derived one.
pub const CONVERGENCE_THRESHOLD: f64 = 65536.0 * f64::EPSILON;

/// A correction four-vector with energy below this value forces another iteration.
pub const UNPHYSICAL_ENERGY: f64 = -1.0;

/// A correction four-vector with invariant mass squared below this value forces another
/// iteration.
pub const UNPHYSICAL_MASS2: f64 = -1.0;

/// A mass constraint on one particle of the decay.
///
/// The sign conventions follow the raw constructor [`MomentumRefitter::from_masses`]:
///
/// * `mass < 0` and `sigma < 0`: no constraint.
/// * `mass >= 0` and `sigma < 0`: constrain to `mass` with an uncertainty derived from
///   single-precision round-off (see [`MEASUREMENT_PRECISION`]).
/// * `mass >= 0` and `sigma > 0`: constrain to `mass` with uncertainty `sigma`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassConstraint {
    /// The nominal mass.
    pub mass: f64,
    /// The uncertainty of the nominal mass.
    pub sigma: f64,
}

impl MassConstraint {
    pub fn new(mass: f64, sigma: f64) -> Self {
        Self { mass, sigma }
    }
    /// A constraint whose uncertainty is derived when the fitter is built.
    pub fn derived(mass: f64) -> Self {
        Self { mass, sigma: -1.0 }
    }
    /// No constraint at all.
    pub fn absent() -> Self {
        Self {
            mass: -1.0,
            sigma: -1.0,
        }
    }
    pub fn is_active(&self) -> bool {
        self.mass >= 0.0
    }
    fn weight_scale(&self) -> f64 {
        self.sigma * self.sigma * f64::max(self.mass * self.mass, 1.0)
    }
}

impl Default for MassConstraint {
    fn default() -> Self {
        Self::absent()
    }
}

fn default_max_iterations() -> usize {
    MAX_ITERATIONS
}

/// The constraint configuration of a [`MomentumRefitter`].
///
/// ```
/// use kinfit::FitterConfig;
///
/// // B_s -> D_s* pi, D_s* -> D_s gamma, with the photon unmeasured
/// let config = FitterConfig::new(5366.3, 1968.49, 139.57018)
///     .with_starred(2112.34)
///     .with_missing(0.0);
/// assert!(config.starred.is_active());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitterConfig {
    pub mother: MassConstraint,
    pub daughter1: MassConstraint,
    pub daughter2: MassConstraint,
    /// A composite of one daughter and the missing particle.
    pub starred: MassConstraint,
    /// The unmeasured particle.
    pub missing: MassConstraint,
    /// Iteration limit of each fit.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl FitterConfig {
    /// Constrain the mother and both daughters to the given masses, with derived
    /// uncertainties and no starred or missing-particle constraint.
    pub fn new(mother_mass: f64, daughter1_mass: f64, daughter2_mass: f64) -> Self {
        Self {
            mother: MassConstraint::derived(mother_mass),
            daughter1: MassConstraint::derived(daughter1_mass),
            daughter2: MassConstraint::derived(daughter2_mass),
            starred: MassConstraint::absent(),
            missing: MassConstraint::absent(),
            max_iterations: MAX_ITERATIONS,
        }
    }
    /// Constrain the starred composite to `mass` with a derived uncertainty.
    pub fn with_starred(self, mass: f64) -> Self {
        self.with_constraint(Slot::Starred, MassConstraint::derived(mass))
    }
    /// Constrain the missing particle to `mass` with a derived uncertainty.
    pub fn with_missing(self, mass: f64) -> Self {
        self.with_constraint(Slot::Missing, MassConstraint::derived(mass))
    }
    /// Replace the constraint on one slot.
    pub fn with_constraint(mut self, slot: Slot, constraint: MassConstraint) -> Self {
        *self.constraint_mut(slot) = constraint;
        self
    }
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
    pub fn constraint(&self, slot: Slot) -> MassConstraint {
        match slot {
            Slot::Mother => self.mother,
            Slot::Daughter1 => self.daughter1,
            Slot::Daughter2 => self.daughter2,
            Slot::Starred => self.starred,
            Slot::Missing => self.missing,
        }
    }
    fn constraint_mut(&mut self, slot: Slot) -> &mut MassConstraint {
        match slot {
            Slot::Mother => &mut self.mother,
            Slot::Daughter1 => &mut self.daughter1,
            Slot::Daughter2 => &mut self.daughter2,
            Slot::Starred => &mut self.starred,
            Slot::Missing => &mut self.missing,
        }
    }
    /// The largest nonzero configured mass, or 1 if there is none.
    pub fn mass_scale(&self) -> f64 {
        let scale = Slot::ALL
            .iter()
            .map(|slot| self.constraint(*slot).mass)
            .filter(|m| *m > 0.0)
            .fold(0.0, f64::max);
        if scale > 0.0 {
            scale
        } else {
            1.0
        }
    }
}

/// Bookkeeping returned by a successful fit.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    /// Number of linearised steps taken, including the final one.
    pub iterations: usize,
    /// The penalty function (measurement, conservation and mass terms) at the fitted point.
    pub chi2: f64,
    /// Dimension of the fit system, 12 or 16.
    pub dim: usize,
    /// The daughter combined with the missing particle into the starred state, if that
    /// constraint took part in the fit.
    pub starred_partner: Option<Daughter>,
}

/// The result of fitting one [`Candidate`].
pub type FitOutcome = KinfitResult<FitSummary>;

/// One set of four-momenta for [`MomentumRefitter::fit_batch`], each as
/// $`(E, p_x, p_y, p_z)`$.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub mother: [f64; 4],
    pub daughter1: [f64; 4],
    pub daughter2: [f64; 4],
    /// `Some` selects the four-body fit. An all-zero vector is seeded from four-momentum
    /// conservation.
    pub missing: Option<[f64; 4]>,
}

/// A refitter for measured four-momenta in a decay
/// $`\text{mother} \to \text{daughter}_1\, \text{daughter}_2\, [\text{missing}]`$.
///
/// Four-momenta saved in single precision do not conserve four-momentum and do not reproduce
/// the masses of the particles exactly. The fit pulls them back, staying as close to the measured
/// values as their single-precision round-off allows, while
///
/// * enforcing four-momentum conservation (practically exactly),
/// * constraining the invariant masses of the mother, the daughters and (optionally) the missing
///   particle,
/// * optionally constraining the mass of a "starred" state made of one daughter and the missing
///   particle; the daughter is chosen automatically as the one closest below the starred mass.
///
/// The problem is solved by Gauss-Newton iteration: each step linearises the constraints, builds
/// the normal equations and solves them with a [`QRDecomposition`].
///
/// A refitter is immutable once built, so one instance can serve any number of threads.
#[derive(Clone, Debug)]
pub struct MomentumRefitter {
    config: FitterConfig,
    starred_partner: Option<Daughter>,
}

impl MomentumRefitter {
    /// Build a refitter, resolving derived uncertainties and the starred-state partner.
    ///
    /// # Errors
    ///
    /// Returns [`KinfitError::InvalidConstraint`] if a mass or uncertainty is not finite, the
    /// mother or a daughter has a negative mass, an absent constraint carries an uncertainty,
    /// an explicit uncertainty is zero, or the iteration limit is zero.
    pub fn new(config: FitterConfig) -> KinfitResult<Self> {
        let mut config = config;
        let mass_scale = config.mass_scale();
        for slot in Slot::ALL {
            let constraint = config.constraint_mut(slot);
            validate_constraint(slot, constraint)?;
            if constraint.is_active() && constraint.sigma < 0.0 {
                constraint.sigma = MEASUREMENT_PRECISION * mass_scale;
            }
        }
        if config.max_iterations == 0 {
            return Err(KinfitError::Custom(
                "The iteration limit of a fit must be at least 1!".to_string(),
            ));
        }
        let starred_partner = find_starred_partner(&config);
        if config.starred.is_active() && starred_partner.is_none() {
            warn!(
                "starred mass {} is not above either daughter mass ({}, {}); constraint disabled",
                config.starred.mass, config.daughter1.mass, config.daughter2.mass
            );
        }
        Ok(Self {
            config,
            starred_partner,
        })
    }

    /// Build a refitter from raw masses and uncertainties.
    ///
    /// Negative `starred_mass`/`missing_mass` (with negative uncertainty) disable those
    /// constraints, and any negative uncertainty paired with a non-negative mass is derived from
    /// single-precision round-off. See [`MassConstraint`].
    #[allow(clippy::too_many_arguments)]
    pub fn from_masses(
        mother_mass: f64,
        daughter1_mass: f64,
        daughter2_mass: f64,
        starred_mass: f64,
        missing_mass: f64,
        sigma_mother_mass: f64,
        sigma_daughter1_mass: f64,
        sigma_daughter2_mass: f64,
        sigma_starred_mass: f64,
        sigma_missing_mass: f64,
    ) -> KinfitResult<Self> {
        Self::new(FitterConfig {
            mother: MassConstraint::new(mother_mass, sigma_mother_mass),
            daughter1: MassConstraint::new(daughter1_mass, sigma_daughter1_mass),
            daughter2: MassConstraint::new(daughter2_mass, sigma_daughter2_mass),
            starred: MassConstraint::new(starred_mass, sigma_starred_mass),
            missing: MassConstraint::new(missing_mass, sigma_missing_mass),
            max_iterations: MAX_ITERATIONS,
        })
    }

    /// The configuration with all derived uncertainties filled in.
    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    /// The daughter paired with the missing particle in the starred constraint, or `None` if
    /// that constraint is not active.
    pub fn starred_partner(&self) -> Option<Daughter> {
        self.starred_partner
    }

    pub fn max_iterations(&self) -> usize {
        self.config.max_iterations
    }

    /// A copy of this refitter with a different iteration limit.
    pub fn with_max_iterations(&self, max_iterations: usize) -> KinfitResult<Self> {
        Self::new(self.config.clone().with_max_iterations(max_iterations))
    }

    /// Fit a three-body candidate in place.
    ///
    /// The arrays hold $`(E, p_x, p_y, p_z)`$. They are overwritten with the fitted values only
    /// if the fit converges; on error they are left untouched. The starred and missing-particle
    /// constraints play no role here.
    ///
    /// # Errors
    ///
    /// [`KinfitError::SingularSystem`] or [`KinfitError::NotConverged`] if the fit fails, and
    /// [`KinfitError::NonFiniteInput`] for NaN or infinite input.
    pub fn fit(
        &self,
        mother: &mut [f64; 4],
        daughter1: &mut [f64; 4],
        daughter2: &mut [f64; 4],
    ) -> KinfitResult<FitSummary> {
        let measured = [
            Vec4::from(*mother),
            Vec4::from(*daughter1),
            Vec4::from(*daughter2),
        ];
        let (fitted, summary) = self.refit(measured, None)?;
        *mother = fitted[0].into();
        *daughter1 = fitted[1].into();
        *daughter2 = fitted[2].into();
        Ok(summary)
    }

    /// Fit a four-body candidate with an unmeasured particle in place.
    ///
    /// If `missing` is all zeros it is seeded as `mother - daughter1 - daughter2`, otherwise its
    /// content is used as the starting point. Error handling is the same as for
    /// [`MomentumRefitter::fit`].
    pub fn fit_with_missing(
        &self,
        mother: &mut [f64; 4],
        daughter1: &mut [f64; 4],
        daughter2: &mut [f64; 4],
        missing: &mut [f64; 4],
    ) -> KinfitResult<FitSummary> {
        let measured = [
            Vec4::from(*mother),
            Vec4::from(*daughter1),
            Vec4::from(*daughter2),
        ];
        let seed = Vec4::from(*missing);
        let seed = if seed.is_zero() {
            measured[0] - measured[1] - measured[2]
        } else {
            seed
        };
        let (fitted, summary) = self.refit(measured, Some(seed))?;
        *mother = fitted[0].into();
        *daughter1 = fitted[1].into();
        *daughter2 = fitted[2].into();
        *missing = fitted[3].into();
        Ok(summary)
    }

    /// Fit one [`Candidate`] in place.
    pub fn fit_candidate(&self, candidate: &mut Candidate) -> FitOutcome {
        let Candidate {
            mother,
            daughter1,
            daughter2,
            missing,
        } = candidate;
        match missing {
            Some(missing) => self.fit_with_missing(mother, daughter1, daughter2, missing),
            None => self.fit(mother, daughter1, daughter2),
        }
    }

    /// Fit every candidate in place, in parallel. Candidates are independent; the outcome of each
    /// fit is returned in the same order.
    #[cfg(feature = "rayon")]
    pub fn fit_batch(&self, candidates: &mut [Candidate]) -> Vec<FitOutcome> {
        candidates
            .par_iter_mut()
            .map(|candidate| self.fit_candidate(candidate))
            .collect()
    }

    /// Fit every candidate in place. Candidates are independent; the outcome of each fit is
    /// returned in the same order.
    #[cfg(not(feature = "rayon"))]
    pub fn fit_batch(&self, candidates: &mut [Candidate]) -> Vec<FitOutcome> {
        candidates
            .iter_mut()
            .map(|candidate| self.fit_candidate(candidate))
            .collect()
    }

    fn refit(
        &self,
        measured: [Vec4; 3],
        missing: Option<Vec4>,
    ) -> KinfitResult<(Vec<Vec4>, FitSummary)> {
        let slots = [
            Slot::Mother,
            Slot::Daughter1,
            Slot::Daughter2,
            Slot::Missing,
        ];
        for (p4, slot) in measured.iter().chain(missing.iter()).zip(slots) {
            if p4.iter().any(|c| !c.is_finite()) {
                return Err(KinfitError::NonFiniteInput {
                    particle: slot.to_string(),
                });
            }
        }
        let system = FitSystem::new(self, measured, missing.is_some());
        let mut q: Vec<Vec4> = measured.iter().copied().chain(missing).collect();
        let dim = system.dim();
        let starred_block = system.starred_partner.and_then(|d| d.slot().block());
        let mut equations = NormalEquations::zeros(dim);

        for iteration in 1..=self.config.max_iterations {
            system.assemble(&q, &mut equations);
            let step = match equations.solve_step() {
                Ok(step) => step,
                Err(KinfitError::SingularSystem { n_sing, .. }) => {
                    warn!("singular fit system at iteration {iteration} (rank {dim} - {n_sing})");
                    return Err(KinfitError::SingularSystem { iteration, n_sing });
                }
                Err(err) => return Err(err),
            };
            if step.iter().any(|x| !x.is_finite()) {
                warn!("non-finite correction at iteration {iteration}");
                return Err(KinfitError::NotConverged {
                    iterations: iteration,
                });
            }

            let converged = apply_step(&mut q, &step, starred_block);
            trace!(
                "iteration {iteration}: largest correction {:e}",
                step.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
            );

            if converged {
                let summary = FitSummary {
                    iterations: iteration,
                    chi2: system.chi2(&q),
                    dim,
                    starred_partner: system.starred_partner,
                };
                debug!(
                    "fit converged after {iteration} iterations (chi2 = {:e})",
                    summary.chi2
                );
                trace!("fitted mother {}", q[0]);
                return Ok((q, summary));
            }
        }
        warn!(
            "fit did not converge within {} iterations",
            self.config.max_iterations
        );
        Err(KinfitError::NotConverged {
            iterations: self.config.max_iterations,
        })
    }
}

fn is_unphysical(correction: &Vec4) -> bool {
    correction[E] < UNPHYSICAL_ENERGY || correction.m2() < UNPHYSICAL_MASS2
}

/// Subtract `step` from `q` and decide whether the fit has converged.
///
/// Every component must be stable to [`CONVERGENCE_THRESHOLD`], absolutely or relative to its
/// new value. A correction which is unphysical on its own, or combined over the starred partner
/// and the missing particle (block 3), always asks for another iteration.
fn apply_step(q: &mut [Vec4], step: &[f64], starred_block: Option<usize>) -> bool {
    let mut converged = true;
    for (k, dq) in step.iter().enumerate() {
        let value = &mut q[k / 4][k % 4];
        *value -= dq;
        if dq.abs() >= CONVERGENCE_THRESHOLD && (dq / *value).abs() >= CONVERGENCE_THRESHOLD {
            converged = false;
        }
    }
    let corrections: Vec<Vec4> = step
        .chunks_exact(4)
        .map(|c| Vec4::new(c[0], c[1], c[2], c[3]))
        .collect();
    if corrections.iter().any(is_unphysical) {
        converged = false;
    }
    if let Some(block) = starred_block {
        if is_unphysical(&(corrections[block] + corrections[3])) {
            converged = false;
        }
    }
    converged
}

fn validate_constraint(slot: Slot, constraint: &MassConstraint) -> KinfitResult<()> {
    let invalid = |reason: &str| {
        Err(KinfitError::InvalidConstraint {
            particle: slot.to_string(),
            reason: reason.to_string(),
        })
    };
    if !constraint.mass.is_finite() || !constraint.sigma.is_finite() {
        return invalid("mass and uncertainty must be finite");
    }
    if constraint.mass < 0.0 {
        if slot.is_measured() {
            return invalid("mass must not be negative");
        }
        if constraint.sigma >= 0.0 {
            return invalid(
                "an absent constraint (negative mass) must have a negative uncertainty",
            );
        }
    }
    if constraint.sigma == 0.0 {
        return invalid("uncertainty must be positive (or negative to derive it)");
    }
    Ok(())
}

/// Pick the daughter lighter than the starred state with the smallest mass gap. On an exact tie
/// the first daughter is kept.
fn find_starred_partner(config: &FitterConfig) -> Option<Daughter> {
    if !config.starred.is_active() {
        return None;
    }
    let star = config.starred.mass;
    let mut best: Option<(Daughter, f64)> = None;
    for (daughter, constraint) in [
        (Daughter::First, config.daughter1),
        (Daughter::Second, config.daughter2),
    ] {
        if star <= constraint.mass {
            continue;
        }
        let gap = star - constraint.mass;
        match best {
            Some((_, best_gap)) if best_gap <= gap => {}
            _ => best = Some((daughter, gap)),
        }
    }
    best.map(|(daughter, _)| daughter)
}

/// One quadratic penalty $`w\, r^2`$ with its linearisation: nonzero entries of $`\partial r /
/// \partial q`$ as `(index, derivative)` pairs.
struct Term {
    residual: f64,
    weight: f64,
    gradient: [(usize, f64); 8],
    len: usize,
}

impl Term {
    fn new(residual: f64, weight: f64) -> Self {
        Self {
            residual,
            weight,
            gradient: [(0, 0.0); 8],
            len: 0,
        }
    }
    fn push(&mut self, index: usize, derivative: f64) {
        self.gradient[self.len] = (index, derivative);
        self.len += 1;
    }
    fn entries(&self) -> &[(usize, f64)] {
        &self.gradient[..self.len]
    }
}

/// The fixed part of one fit call: measured values, their weights and the active constraints.
struct FitSystem {
    measured: [Vec4; 3],
    measurement_weights: [[f64; 4]; 3],
    conservation_weights: [f64; 4],
    // (block, constraint) for every block with an active mass constraint
    mass_constraints: Vec<(usize, MassConstraint)>,
    starred: Option<MassConstraint>,
    starred_partner: Option<Daughter>,
    n_blocks: usize,
}

impl FitSystem {
    fn new(fitter: &MomentumRefitter, measured: [Vec4; 3], with_missing: bool) -> Self {
        let measurement_weights = measured.map(|p4| {
            p4.0.map(|c| {
                let sigma = MEASUREMENT_PRECISION * f64::max(c.abs(), 1.0);
                1.0 / (sigma * sigma)
            })
        });
        let mut conservation_weights = [0.0; 4];
        for (i, w) in conservation_weights.iter_mut().enumerate() {
            let p2: f64 = measured.iter().map(|p4| p4[i] * p4[i]).sum();
            *w = 1.0 / (CONSERVATION_VARIANCE_SCALE * f64::max(p2, 1.0));
        }
        let config = fitter.config();
        let mut slots = vec![Slot::Mother, Slot::Daughter1, Slot::Daughter2];
        if with_missing {
            slots.push(Slot::Missing);
        }
        let mass_constraints = slots
            .iter()
            .filter_map(|slot| {
                let constraint = config.constraint(*slot);
                match (slot.block(), constraint.is_active()) {
                    (Some(block), true) => Some((block, constraint)),
                    _ => None,
                }
            })
            .collect();
        let starred_partner = if with_missing {
            fitter.starred_partner()
        } else {
            None
        };
        Self {
            measured,
            measurement_weights,
            conservation_weights,
            mass_constraints,
            starred: starred_partner.map(|_| config.starred),
            starred_partner,
            n_blocks: slots.len(),
        }
    }

    fn for_each_term(&self, q: &[Vec4], mut f: impl FnMut(&Term)) {
        // agreement with the measurement
        for (block, (p4, weights)) in self
            .measured
            .iter()
            .zip(&self.measurement_weights)
            .enumerate()
        {
            for i in 0..4 {
                let mut term = Term::new(q[block][i] - p4[i], weights[i]);
                term.push(4 * block + i, 1.0);
                f(&term);
            }
        }
        // four-momentum conservation
        for i in 0..4 {
            let daughters: f64 = q[1..self.n_blocks].iter().map(|p4| p4[i]).sum();
            let mut term = Term::new(q[0][i] - daughters, self.conservation_weights[i]);
            term.push(i, 1.0);
            for block in 1..self.n_blocks {
                term.push(4 * block + i, -1.0);
            }
            f(&term);
        }
        // masses
        for (block, constraint) in &self.mass_constraints {
            let p4 = q[*block];
            let mut term = Term::new(
                p4.m2() - constraint.mass * constraint.mass,
                1.0 / constraint.weight_scale(),
            );
            for (i, g) in p4.m2_gradient().into_iter().enumerate() {
                term.push(4 * block + i, g);
            }
            f(&term);
        }
        // starred composite
        if let (Some(constraint), Some(partner)) = (self.starred, self.starred_partner) {
            if let Some(block) = partner.slot().block() {
                let composite = q[block] + q[3];
                let mut term = Term::new(
                    composite.m2() - constraint.mass * constraint.mass,
                    1.0 / (4.0 * constraint.weight_scale()),
                );
                for (i, g) in composite.m2_gradient().into_iter().enumerate() {
                    term.push(4 * block + i, g);
                    term.push(12 + i, g);
                }
                f(&term);
            }
        }
    }

    fn dim(&self) -> usize {
        4 * self.n_blocks
    }

    fn assemble(&self, q: &[Vec4], equations: &mut NormalEquations) {
        equations.reset();
        self.for_each_term(q, |term| equations.add(term));
    }

    fn chi2(&self, q: &[Vec4]) -> f64 {
        let mut chi2 = 0.0;
        self.for_each_term(q, |term| {
            chi2 += term.weight * term.residual * term.residual;
        });
        chi2
    }
}

/// Gauss-Newton normal equations $`J^T W J\, \delta = J^T W r`$.
struct NormalEquations {
    matrix: DenseMatrix<f64>,
    rhs: Vec<f64>,
}

impl NormalEquations {
    fn zeros(dim: usize) -> Self {
        Self {
            matrix: DenseMatrix::zeros(dim, dim),
            rhs: vec![0.0; dim],
        }
    }

    fn reset(&mut self) {
        self.matrix.fill_zero();
        self.rhs.fill(0.0);
    }

    fn add(&mut self, term: &Term) {
        let w = term.weight;
        for &(k, gk) in term.entries() {
            self.rhs[k] += w * gk * term.residual;
            for &(l, gl) in term.entries() {
                self.matrix[(k, l)] += w * gk * gl;
            }
        }
    }

    /// Solve for the correction $`\delta`$ to subtract from the current point. The matrix is
    /// rescaled in place, so the equations must be reassembled before the next solve.
    ///
    /// The measurement and conservation weights differ by about twelve orders of magnitude, so
    /// the system is equilibrated to unit diagonal first; otherwise the soft directions fall
    /// below the singularity threshold of a double-precision decomposition.
    fn solve_step(&mut self) -> KinfitResult<Vec<f64>> {
        let dim = self.rhs.len();
        let scales: Vec<f64> = (0..dim)
            .map(|k| {
                let d = self.matrix[(k, k)];
                if d > 0.0 {
                    1.0 / d.sqrt()
                } else {
                    1.0
                }
            })
            .collect();
        for k in 0..dim {
            for l in 0..dim {
                self.matrix[(k, l)] *= scales[k] * scales[l];
            }
            self.rhs[k] *= scales[k];
        }
        let qr = QRDecomposition::new(dim, &self.matrix, None)?;
        if !qr.ok() {
            return Err(KinfitError::SingularSystem {
                iteration: 0,
                n_sing: qr.n_sing(),
            });
        }
        let mut step = self.rhs.clone();
        qr.solve(&mut step)?;
        step.iter_mut()
            .zip(&scales)
            .for_each(|(x, scale)| *x *= scale);
        Ok(step)
    }
}
