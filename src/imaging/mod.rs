/// Image handling module
///
/// This module handles:
/// - Decoding raster bytes from remote services (codec.rs)
/// - Encoding rasters as PNG data URLs for display (codec.rs)
/// - Saving colorized results to disk (export.rs)

pub mod codec;
pub mod export;

pub use codec::{CodecError, EncodedImage, ImageArtifact, RasterImage};
