//! hopsync-core — shared wire formats, protocol constants, and configuration.
//! All other hopsync crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{Advertisement, ProbeName, WireError};
