//! Client-side image transformation
//!
//! Decodes a source image, renders it onto a fresh surface at the target
//! size, re-encodes it and optionally produces a square thumbnail.

pub mod engine;
pub mod error;
pub mod types;

pub use engine::{compute_target_dimensions, ImageTransformer};
pub use error::{TransformError, TransformResult};
pub use types::{
    Dimensions, ImageAsset, ImageFilter, OutputFormat, TransformMetadata, TransformOptions,
    TransformedFile,
};
