use crate::core::error::ProcessingError;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::RgbaImage;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

pub const PNG_MIME: &str = "image/png";

/// An encoded image as it travels between collaborators.
///
/// The bytes are shared, so cloning a session snapshot never copies pixel data.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Wraps bytes of unknown type, guessing the mime type from the content.
    pub fn sniff(bytes: Vec<u8>) -> Self {
        let mime_type = image::guess_format(&bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        Self::new(mime_type, bytes)
    }

    pub fn from_base64(mime_type: &str, data: &str) -> Result<Self, base64::DecodeError> {
        let bytes = BASE64_STANDARD.decode(data.trim())?;
        Ok(Self::new(mime_type, bytes))
    }

    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime_type = header.strip_suffix(";base64")?;
        Self::from_base64(mime_type, payload).ok()
    }

    /// Encodes an RGBA buffer as PNG.
    pub fn from_rgba(image: &RgbaImage) -> Result<Self, ProcessingError> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| ProcessingError::Encode(e.to_string()))?;
        Ok(Self::new(PNG_MIME, buf))
    }

    pub fn decode_rgba(&self) -> Result<RgbaImage, ProcessingError> {
        let decoded = image::load_from_memory(&self.bytes)
            .map_err(|e| ProcessingError::Decode(e.to_string()))?;
        Ok(decoded.into_rgba8())
    }

    /// Returns a PNG encoding of this image, re-encoding other formats.
    pub fn to_png(&self) -> Result<Self, ProcessingError> {
        if self.is_png() {
            return Ok(self.clone());
        }
        Self::from_rgba(&self.decode_rgba()?)
    }

    pub fn is_png(&self) -> bool {
        self.mime_type == PNG_MIME
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}
