//! Helper items describing the structures being embedded.

pub mod atom;
pub mod structure;
