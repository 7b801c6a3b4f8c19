//! Core value domain: concrete EVM arithmetic and the abstract lattice
//! lifted over it.

pub mod arithmetic;
pub mod lattice;
