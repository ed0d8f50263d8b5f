/// Raster decoding and data-URL encoding
///
/// Raster bytes from the imagery service or the model are decoded into a
/// `RasterImage`; anything shown to the user is re-encoded as PNG and wrapped
/// in a `data:image/png;base64,` string (`EncodedImage`).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

const PNG_MIME: &str = "image/png";
const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("image payload is empty")]
    Empty,

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image as PNG: {0}")]
    Encode(#[source] image::ImageError),

    #[error("not a base64 data URL")]
    NotDataUrl,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Raw bytes plus MIME type, as produced by a remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageArtifact {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new(bytes, PNG_MIME)
    }
}

/// A decoded raster that can be inspected and re-encoded
#[derive(Debug, Clone)]
pub struct RasterImage {
    pixels: DynamicImage,
    source_format: Option<ImageFormat>,
}

impl RasterImage {
    #[cfg(test)]
    pub fn from_pixels(pixels: DynamicImage) -> Self {
        Self {
            pixels,
            source_format: None,
        }
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Format the bytes were decoded from, if it could be sniffed
    pub fn source_format(&self) -> Option<ImageFormat> {
        self.source_format
    }

    /// Serialize to PNG bytes
    pub fn to_png(&self) -> Result<Vec<u8>, CodecError> {
        let mut buffer = Cursor::new(Vec::new());
        self.pixels
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(CodecError::Encode)?;
        Ok(buffer.into_inner())
    }
}

/// MIME-prefixed base64 text; the only image form handed to the view layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedImage(String);

impl EncodedImage {
    /// Wrap an existing data URL after checking its shape
    #[cfg(test)]
    pub fn from_data_url(url: impl Into<String>) -> Result<Self, CodecError> {
        let url = url.into();
        let Some((header, payload)) = url.split_once(',') else {
            return Err(CodecError::NotDataUrl);
        };
        if !header.starts_with("data:") || !header.ends_with(";base64") || payload.is_empty() {
            return Err(CodecError::NotDataUrl);
        }
        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn mime_type(&self) -> &str {
        self.0
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(';'))
            .map(|(mime, _)| mime)
            .unwrap_or(PNG_MIME)
    }

    /// Decode the base64 payload back to binary
    pub fn payload_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let (_, payload) = self.0.split_once(',').ok_or(CodecError::NotDataUrl)?;
        Ok(STANDARD.decode(payload)?)
    }
}

/// Validate and parse raster bytes
pub fn decode(bytes: &[u8]) -> Result<RasterImage, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }

    let source_format = image::guess_format(bytes).ok();
    let pixels = image::load_from_memory(bytes).map_err(CodecError::Decode)?;

    Ok(RasterImage {
        pixels,
        source_format,
    })
}

/// Re-encode as PNG and wrap as a data URL
pub fn encode(image: &RasterImage) -> Result<EncodedImage, CodecError> {
    let png = image.to_png()?;
    Ok(EncodedImage(format!(
        "{}{}",
        PNG_DATA_URL_PREFIX,
        STANDARD.encode(png)
    )))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    /// Small PNG whose every pixel is `color`
    pub(crate) fn solid_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        RasterImage::from_pixels(DynamicImage::ImageRgba8(img))
            .to_png()
            .unwrap()
    }

    fn gradient() -> RgbaImage {
        RgbaImage::from_fn(7, 5, |x, y| Rgba([(x * 30) as u8, (y * 50) as u8, 200, 255 - x as u8]))
    }

    #[test]
    fn test_decode_rejects_empty_and_garbage() {
        assert!(matches!(decode(&[]), Err(CodecError::Empty)));
        assert!(matches!(decode(b"not an image"), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_encode_produces_png_data_url() {
        let raster = decode(&solid_png(3, 2, [10, 20, 30, 255])).unwrap();
        assert_eq!(raster.source_format(), Some(ImageFormat::Png));

        let encoded = encode(&raster).unwrap();
        assert!(encoded.as_str().starts_with("data:image/png;base64,"));
        assert_eq!(encoded.mime_type(), "image/png");
    }

    #[test]
    fn test_png_round_trip_is_pixel_exact() {
        let original = RasterImage::from_pixels(DynamicImage::ImageRgba8(gradient()));
        let first = decode(&original.to_png().unwrap()).unwrap();

        let encoded = encode(&first).unwrap();
        let second = decode(&encoded.payload_bytes().unwrap()).unwrap();

        assert_eq!(second.width(), 7);
        assert_eq!(second.height(), 5);
        assert_eq!(first.pixels().to_rgba8(), second.pixels().to_rgba8());
        assert_eq!(gradient(), second.pixels().to_rgba8());
    }

    #[test]
    fn test_jpeg_input_is_normalized_to_png() {
        let rgb = DynamicImage::ImageRgba8(gradient()).to_rgb8();
        let mut jpeg = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(rgb)
            .write_to(&mut jpeg, ImageFormat::Jpeg)
            .unwrap();

        let raster = decode(jpeg.get_ref()).unwrap();
        assert_eq!(raster.source_format(), Some(ImageFormat::Jpeg));

        let encoded = encode(&raster).unwrap();
        let bytes = encoded.payload_bytes().unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_data_url_validation() {
        assert!(EncodedImage::from_data_url("data:image/jpeg;base64,AAAA").is_ok());
        assert_eq!(
            EncodedImage::from_data_url("data:image/jpeg;base64,AAAA")
                .unwrap()
                .mime_type(),
            "image/jpeg"
        );
        assert!(matches!(
            EncodedImage::from_data_url("https://example.com/a.png"),
            Err(CodecError::NotDataUrl)
        ));
        assert!(matches!(
            EncodedImage::from_data_url("data:image/png;base64,"),
            Err(CodecError::NotDataUrl)
        ));

        let broken = EncodedImage::from_data_url("data:image/png;base64,@@@").unwrap();
        assert!(matches!(broken.payload_bytes(), Err(CodecError::Base64(_))));
    }
}
