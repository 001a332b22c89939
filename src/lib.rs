//! Biosignal recording pipeline.
//!
//! Numbered device frames are repaired into a contiguous record stream by the
//! [`engine::FrameAdapter`], reshaped by the [`stages`], and stored by
//! [`edf::EdfWriter`] in the EDF/BDF layout.

pub mod config;
pub mod core;
pub mod edf;
pub mod engine;
pub mod error;
pub mod hal;
pub mod observability;
pub mod stages;

pub use error::{Error, Result};
