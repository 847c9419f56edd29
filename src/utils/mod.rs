//! Internal containers.

pub(crate) mod slab;
