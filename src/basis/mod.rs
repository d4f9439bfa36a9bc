//! Atomic-orbital basis bookkeeping for basis-set truncation.

pub mod basis_info;
pub mod truncation;
