//! Landmark map layer.
//!
//! - [`Cone`]: a single landmark with classification votes and graph linkage
//! - [`ConeMap`]: id-stable arena of cones with nearest lookup and filtering

mod cone;
mod registry;

pub use cone::{Cone, ConeClass, ConeId};
pub use registry::{ConeMap, MapFilterConfig};
