//! Card localization and rectification.
//!
//! [`CardDetector`] finds the card outline in a camera frame and
//! [`PerspectiveNormalizer`] turns that outline into a canonical upright
//! image ready for fingerprinting.

pub mod geometry;
pub mod perspective;

pub use geometry::{approximate_closed_polygon, CardDetector, OrderedCorners, Quad};
pub use perspective::{orient_portrait, orientation_crops, NormalizedCard, PerspectiveNormalizer};
