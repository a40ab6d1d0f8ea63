//! Core trait abstractions for the extraction library.
//!
//! These traits are the seams applications plug into: model backends and
//! output schemas.

pub mod provider;
pub mod schema;
