//! Consumer-side façade (spec §4.6).

pub mod surface;

pub use surface::ConsumerSurface;
