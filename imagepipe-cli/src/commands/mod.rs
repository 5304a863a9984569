//! CLI command implementations.
//!
//! - [`fetch`] - Load images through the pipeline and save them as PNG

pub mod fetch;
