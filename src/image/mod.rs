//! Image reference handling
//!
//! Pure helpers for taking apart image references (`host/org/name:tag`) and
//! for computing the repository path an image lands on in the target registry.
//! Nothing in this module performs I/O.

pub mod reference;
pub mod rewrite;

pub use reference::{ImageReference, registry_host, sanitize_image_name};
pub use rewrite::{ReplaceLevel, rewrite};
