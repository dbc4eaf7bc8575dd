//! Concrete fd kinds.

pub mod file;
pub mod pipe;
