#![doc = include_str!("../README.md")]

//! Lockmeet analysis engine.
//!
//! This crate implements the protected state store, the thread-local
//! privatization context, mutex-meet privatization over mutex clusters,
//! invariant queries, and the fixpoint pipeline with its report.

pub mod context;
pub mod pipeline;
pub mod privatization;
pub mod query;
pub mod relation;
pub mod result;
pub mod store;
