//! The bounded, cancellable tool-calling loop.

pub mod runner;
pub mod types;

pub use runner::*;
pub use types::*;
