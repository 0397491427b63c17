//! Architecture seam
//!
//! The scheduling core never touches registers or control registers itself.
//! Everything hardware-specific goes through [`ContextHal`], implemented by
//! the embedding kernel for its target and by [`SoftContext`] for hosted
//! runs and tests.

pub mod context;

pub use context::{ContextHal, CpuContext, SoftContext};
