//! Decoded images and their encoded (data URI) references.
//!
//! Every image that enters a project is stored as a self-describing
//! `data:<mime>;base64,<payload>` string. [`ImageHandle`] is the decoded,
//! drawable form of such a reference.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, ImageEncoder, RgbaImage};

use crate::error::DecodeError;

/// A decoded image: pixel dimensions plus an RGBA surface to draw from.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageHandle {
    pixels: RgbaImage,
}

impl ImageHandle {
    pub fn from_image(pixels: RgbaImage) -> Result<Self, DecodeError> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(DecodeError::Empty);
        }
        Ok(Self { pixels })
    }

    /// Decode raw encoded bytes (PNG, JPEG, WEBP, …).
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let img = image::load_from_memory(bytes)?.to_rgba8();
        Self::from_image(img)
    }

    /// Decode a `data:` URI reference.
    pub fn decode_ref(image_ref: &str) -> Result<Self, DecodeError> {
        let bytes = data_uri_bytes(image_ref)?;
        Self::decode_bytes(&bytes)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        encode_png(&self.pixels).map_err(DecodeError::Encode)
    }

    pub fn to_data_uri(&self) -> Result<String, DecodeError> {
        Ok(png_data_uri(&self.to_png_bytes()?))
    }
}

/// Encode RGBA pixels as PNG.
pub fn encode_png(pixels: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    PngEncoder::new(Cursor::new(&mut buf)).write_image(
        pixels.as_raw(),
        pixels.width(),
        pixels.height(),
        ColorType::Rgba8,
    )?;
    Ok(buf)
}

/// Encode RGBA pixels as JPEG. Alpha is dropped; the JPEG codec has none.
pub fn encode_jpeg(pixels: &RgbaImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgba8(pixels.clone()).to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
    Ok(buf)
}

pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Wrap arbitrary encoded image bytes in a data URI, sniffing the MIME type.
pub fn bytes_to_data_uri(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Extract the payload of a `data:[<mime>];base64,<payload>` URI.
pub fn data_uri_bytes(image_ref: &str) -> Result<Vec<u8>, DecodeError> {
    let rest = image_ref
        .trim()
        .strip_prefix("data:")
        .ok_or(DecodeError::NotADataUri)?;
    let (header, payload) = rest.split_once(',').ok_or(DecodeError::NotADataUri)?;
    if !header.ends_with(";base64") {
        return Err(DecodeError::NotADataUri);
    }
    Ok(STANDARD.decode(payload.trim())?)
}
