/// Enumerations naming the particles taking part in a fit.
pub mod enums;
/// A four-momentum type with the arithmetic the refitter needs.
pub mod vectors;
