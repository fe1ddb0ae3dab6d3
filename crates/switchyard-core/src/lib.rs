//! Types shared by the gateway's HTTP-facing crates

#![allow(clippy::must_use_candidate)]

pub mod context;
pub mod error;

pub use context::*;
pub use error::*;
