use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::KinfitError;

/// One of the two directly measured daughters of the decay
/// $`\text{mother} \to \text{daughter}_1\, \text{daughter}_2\, [\text{missing}]`$.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Daughter {
    /// The first daughter.
    First,
    /// The second daughter.
    Second,
}
impl Daughter {
    /// The particle [`Slot`] this daughter occupies in a fit.
    pub fn slot(&self) -> Slot {
        match self {
            Daughter::First => Slot::Daughter1,
            Daughter::Second => Slot::Daughter2,
        }
    }
}
impl Display for Daughter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Daughter::First => write!(f, "daughter 1"),
            Daughter::Second => write!(f, "daughter 2"),
        }
    }
}
impl FromStr for Daughter {
    type Err = KinfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "first" | "d1" | "daughter1" | "daughter 1" => Ok(Self::First),
            "2" | "second" | "d2" | "daughter2" | "daughter 2" => Ok(Self::Second),
            _ => Err(KinfitError::ParseError {
                name: s.to_string(),
                object: "Daughter".to_string(),
            }),
        }
    }
}

/// The particle slots which can carry a mass constraint.
///
/// The first four slots own a four-vector block in the fit system, in the order given by
/// [`Slot::block`]. [`Slot::Starred`] is the composite of one daughter and the missing particle
/// and has no block of its own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// The decaying particle.
    Mother,
    /// The first measured daughter.
    Daughter1,
    /// The second measured daughter.
    Daughter2,
    /// An unmeasured particle, reconstructed from four-momentum conservation.
    Missing,
    /// An intermediate state made of one daughter and the missing particle.
    Starred,
}
impl Slot {
    /// All slots, in configuration order.
    pub const ALL: [Slot; 5] = [
        Slot::Mother,
        Slot::Daughter1,
        Slot::Daughter2,
        Slot::Starred,
        Slot::Missing,
    ];

    /// Index of the four-vector block of this slot in a fit system, if it has one.
    pub fn block(&self) -> Option<usize> {
        match self {
            Slot::Mother => Some(0),
            Slot::Daughter1 => Some(1),
            Slot::Daughter2 => Some(2),
            Slot::Missing => Some(3),
            Slot::Starred => None,
        }
    }

    /// Whether the four-momentum of this slot is measured rather than inferred.
    pub fn is_measured(&self) -> bool {
        matches!(self, Slot::Mother | Slot::Daughter1 | Slot::Daughter2)
    }
}
impl Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Mother => write!(f, "mother"),
            Slot::Daughter1 => write!(f, "daughter 1"),
            Slot::Daughter2 => write!(f, "daughter 2"),
            Slot::Missing => write!(f, "missing particle"),
            Slot::Starred => write!(f, "starred state"),
        }
    }
}
impl FromStr for Slot {
    type Err = KinfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mother" | "m" | "parent" => Ok(Self::Mother),
            "daughter1" | "daughter 1" | "d1" => Ok(Self::Daughter1),
            "daughter2" | "daughter 2" | "d2" => Ok(Self::Daughter2),
            "missing" | "missing particle" | "miss" => Ok(Self::Missing),
            "starred" | "starred state" | "star" => Ok(Self::Starred),
            _ => Err(KinfitError::ParseError {
                name: s.to_string(),
                object: "Slot".to_string(),
            }),
        }
    }
}
