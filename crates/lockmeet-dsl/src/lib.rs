#![doc = include_str!("../README.md")]

//! Lockmeet trace language.
//!
//! A `.lmt` file declares globals, the mutexes protecting them, and one
//! straight-line event script per thread. The thread named `main` is the
//! entry point. An optional `analysis { key: value; }` block carries
//! analysis options.

pub mod ast;
pub mod errors;
pub mod parser;

pub use parser::parse;
