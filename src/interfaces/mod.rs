//! Outer surfaces of the crate.

pub mod script;
