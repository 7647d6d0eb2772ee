//! Binary entry points

pub mod cleanup;
pub mod convert;
