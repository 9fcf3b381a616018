#![doc = include_str!("../README.md")]

//! Lockmeet intermediate representation.
//!
//! This crate defines the threaded-program IR, the lowering pass from the
//! DSL AST, the abstract value domains consumed by the engine, and the
//! mutex cluster table.

pub mod clustering;
pub mod domain;
pub mod lowering;
pub mod program;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;
