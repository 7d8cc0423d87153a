use std::{
    fmt::Display,
    iter::Sum,
    ops::{Index, IndexMut},
};

use auto_ops::{impl_op_ex, impl_op_ex_commutative};
use serde::{Deserialize, Serialize};

/// Index of the energy component of a [`Vec4`].
pub const E: usize = 0;
/// Index of the $`x`$-momentum component of a [`Vec4`].
pub const PX: usize = 1;
/// Index of the $`y`$-momentum component of a [`Vec4`].
pub const PY: usize = 2;
/// Index of the $`z`$-momentum component of a [`Vec4`].
pub const PZ: usize = 3;

/// A four-momentum stored as $`(E, p_x, p_y, p_z)`$.
///
/// This is the same component order the fitter accepts in plain `[f64; 4]` arrays, so the
/// conversion in either direction is a copy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec4(pub [f64; 4]);

impl From<[f64; 4]> for Vec4 {
    fn from(value: [f64; 4]) -> Self {
        Self(value)
    }
}
impl From<Vec4> for [f64; 4] {
    fn from(value: Vec4) -> Self {
        value.0
    }
}

impl Vec4 {
    /// Create a new four-momentum from its energy and momentum components.
    pub fn new(e: f64, px: f64, py: f64, pz: f64) -> Self {
        Self([e, px, py, pz])
    }
    /// Create a four-momentum from a three-momentum and a mass.
    pub fn from_momentum(px: f64, py: f64, pz: f64, mass: f64) -> Self {
        let e = (mass * mass + px * px + py * py + pz * pz).sqrt();
        Self([e, px, py, pz])
    }
    pub fn e(&self) -> f64 {
        self.0[E]
    }
    pub fn px(&self) -> f64 {
        self.0[PX]
    }
    pub fn py(&self) -> f64 {
        self.0[PY]
    }
    pub fn pz(&self) -> f64 {
        self.0[PZ]
    }
    /// The squared magnitude of the three-momentum.
    pub fn p2(&self) -> f64 {
        self.px() * self.px() + self.py() * self.py() + self.pz() * self.pz()
    }
    /// The invariant mass squared, $`E^2 - \vec{p}^2`$. This can be negative for unphysical
    /// (space-like) vectors.
    pub fn m2(&self) -> f64 {
        self.e() * self.e() - self.p2()
    }
    /// The invariant mass. Space-like vectors return the negative square root of $`|m^2|`$, so
    /// the sign is kept instead of producing a NaN.
    pub fn m(&self) -> f64 {
        let m2 = self.m2();
        if m2 < 0.0 {
            -(-m2).sqrt()
        } else {
            m2.sqrt()
        }
    }
    /// The gradient of [`Vec4::m2`] with respect to $`(E, p_x, p_y, p_z)`$.
    pub fn m2_gradient(&self) -> [f64; 4] {
        [
            2.0 * self.e(),
            -2.0 * self.px(),
            -2.0 * self.py(),
            -2.0 * self.pz(),
        ]
    }
    /// Returns `true` if every component is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|c| *c == 0.0)
    }
    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.0.iter()
    }
    /// The velocity $`\vec{p} / E`$ of a particle with this four-momentum.
    pub fn beta(&self) -> [f64; 3] {
        [
            self.px() / self.e(),
            self.py() / self.e(),
            self.pz() / self.e(),
        ]
    }
    /// Lorentz-boost this four-momentum by the velocity `beta`.
    ///
    /// Boosting a vector given in the rest frame of `p` by `p.beta()` yields it in the frame `p`
    /// is measured in. A zero velocity returns the vector unchanged.
    pub fn boost(&self, beta: &[f64; 3]) -> Self {
        let b2: f64 = beta.iter().map(|b| b * b).sum();
        if b2 == 0.0 {
            return *self;
        }
        let gamma = 1.0 / (1.0 - b2).sqrt();
        let bp = beta[0] * self.px() + beta[1] * self.py() + beta[2] * self.pz();
        let k = (gamma - 1.0) * bp / b2 + gamma * self.e();
        Self([
            gamma * (self.e() + bp),
            self.px() + k * beta[0],
            self.py() + k * beta[1],
            self.pz() + k * beta[2],
        ])
    }
    pub fn to_p4_string(&self) -> String {
        format!(
            "[e = {:.5}; p = ({:.5}, {:.5}, {:.5}); m = {:.5}]",
            self.e(),
            self.px(),
            self.py(),
            self.pz(),
            self.m()
        )
    }
    fn add(&self, other: &Self) -> Self {
        Self([
            self.0[0] + other.0[0],
            self.0[1] + other.0[1],
            self.0[2] + other.0[2],
            self.0[3] + other.0[3],
        ])
    }
    fn sub(&self, other: &Self) -> Self {
        Self([
            self.0[0] - other.0[0],
            self.0[1] - other.0[1],
            self.0[2] - other.0[2],
            self.0[3] - other.0[3],
        ])
    }
    fn mul(&self, other: &f64) -> Self {
        Self(self.0.map(|c| c * other))
    }
    fn neg(&self) -> Self {
        Self(self.0.map(|c| -c))
    }
}

impl Display for Vec4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_p4_string())
    }
}

impl Index<usize> for Vec4 {
    type Output = f64;
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}
impl IndexMut<usize> for Vec4 {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl Sum for Vec4 {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Vec4::default(), |acc, p4| acc + p4)
    }
}
impl<'a> Sum<&'a Vec4> for Vec4 {
    fn sum<I: Iterator<Item = &'a Vec4>>(iter: I) -> Self {
        iter.fold(Vec4::default(), |acc, p4| acc + p4)
    }
}

impl_op_ex!(+ |a: &Vec4, b: &Vec4| -> Vec4 { a.add(b) });
impl_op_ex!(-|a: &Vec4, b: &Vec4| -> Vec4 { a.sub(b) });
impl_op_ex!(-|a: &Vec4| -> Vec4 { a.neg() });
impl_op_ex_commutative!(*|a: &Vec4, b: &f64| -> Vec4 { a.mul(b) });

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_vec_sums() {
        let a = Vec4::new(10.0, 1.0, 2.0, 3.0);
        let b = Vec4::new(20.0, 4.0, 5.0, 6.0);
        let c = a + b;
        assert_eq!(c, Vec4::new(30.0, 5.0, 7.0, 9.0));
        let d = &c - &b;
        assert_eq!(d, a);
        let total: Vec4 = [a, b, -a].iter().sum();
        assert_eq!(total, b);
        assert_eq!(2.0 * a, Vec4::new(20.0, 2.0, 4.0, 6.0));
    }

    #[test]
    fn test_four_momentum_basics() {
        let p = Vec4::new(10.0, 3.0, 4.0, 5.0);
        assert_eq!(p.e(), 10.0);
        assert_eq!(p.px(), 3.0);
        assert_eq!(p.py(), 4.0);
        assert_eq!(p.pz(), 5.0);
        assert_eq!(p[PZ], 5.0);
        assert_relative_eq!(p.p2(), 50.0);
        assert_relative_eq!(p.m2(), 50.0);
        assert_relative_eq!(p.m(), 50.0_f64.sqrt());
        assert_eq!(p.m2_gradient(), [20.0, -6.0, -8.0, -10.0]);
    }

    #[test]
    fn test_spacelike_mass_keeps_sign() {
        let p = Vec4::new(3.0, 0.0, 0.0, 5.0);
        assert_relative_eq!(p.m2(), -16.0);
        assert_relative_eq!(p.m(), -4.0);
    }

    #[test]
    fn test_from_momentum() {
        let p = Vec4::from_momentum(0.3, -0.4, 1.2, 0.13957018);
        assert_relative_eq!(p.m(), 0.13957018, epsilon = 1e-12);
        let array: [f64; 4] = p.into();
        assert_eq!(Vec4::from(array), p);
        assert!(Vec4::default().is_zero());
        assert!(!p.is_zero());
    }

    #[test]
    fn test_boost_from_rest_frame() {
        let parent = Vec4::from_momentum(1200.0, -300.0, 45000.0, 5366.3);
        let at_rest = Vec4::new(5366.3, 0.0, 0.0, 0.0);
        let boosted = at_rest.boost(&parent.beta());
        for i in 0..4 {
            assert_relative_eq!(boosted[i], parent[i], epsilon = 1e-9, max_relative = 1e-12);
        }
        let daughter = Vec4::from_momentum(100.0, 250.0, -30.0, 1968.49);
        let moving = daughter.boost(&parent.beta());
        assert_relative_eq!(moving.m(), 1968.49, max_relative = 1e-12);
        assert!(moving.pz() > daughter.pz());
        assert_eq!(daughter.boost(&[0.0; 3]), daughter);
    }

    #[test]
    fn test_display() {
        let p = Vec4::new(5.0, 0.0, 0.0, 3.0);
        assert_eq!(
            p.to_string(),
            "[e = 5.00000; p = (0.00000, 0.00000, 3.00000); m = 4.00000]"
        );
    }
}
