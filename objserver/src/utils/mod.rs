//! Internal data structures.
//!
//! The [`Slab`] here backs both the process-wide poll table and the
//! per-process handle tables: both hand out small integer slots that are
//! reused after release.

mod slab;

pub(crate) use slab::Slab;
