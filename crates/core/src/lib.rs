//! Domain logic for the reconstruction gateway.
//!
//! Everything here is independent of HTTP: upload validation, the on-disk
//! job layout, status derivation, and image normalization. The `pipeline`
//! and `api` crates build on these pieces.

pub mod error;
pub mod intake;
pub mod layout;
pub mod staging;
pub mod status;
