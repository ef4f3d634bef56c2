//! Bits API request handlers

pub mod blobs;
pub mod manifest;
pub mod signing;

pub use blobs::*;
pub use manifest::*;
pub use signing::*;
