//! Concrete collaborators for the pipeline traits.
//!
//! # Adapters
//!
//! - [`ReqwestTransport`] - Streams HTTP bodies through `reqwest`
//! - [`ImageRsDecoder`] - Decodes PNG, JPEG, GIF, WebP and BMP with the `image` crate
//! - [`Resize`], [`Grayscale`], [`GaussianBlur`] - `image`-crate processors

mod decoder;
mod processors;
mod transport;

pub use decoder::ImageRsDecoder;
pub use processors::{GaussianBlur, Grayscale, Resize};
pub use transport::ReqwestTransport;
