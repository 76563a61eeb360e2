//! Recording format negotiation

use serde::{Serialize, Serializer};
use tracing::{debug, info};

use super::encoder::EncoderFactory;
use crate::error::RecorderError;

/// MIME type of the built-in segment container
pub const SEGMENT_MIME: &str = "video/x-screenmix;codecs=rle,pcm";

/// Formats in descending order of preference
pub const PREFERRED_FORMATS: [&str; 6] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm",
    SEGMENT_MIME,
];

/// Container plus optional codec list, e.g. `video/webm;codecs=vp9,opus`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaFormat {
    mime: String,
}

impl MediaFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        Self { mime: mime.into() }
    }

    pub fn segment() -> Self {
        Self::new(SEGMENT_MIME)
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Container part, without parameters
    pub fn container(&self) -> &str {
        self.mime.split(';').next().unwrap_or("").trim()
    }

    pub fn codecs(&self) -> Vec<&str> {
        self.mime
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().strip_prefix("codecs="))
            .flat_map(|codecs| codecs.split(','))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// File extension for artifacts of this format
    pub fn extension(&self) -> &'static str {
        match self.container() {
            "video/webm" => "webm",
            "video/x-screenmix" => "smx",
            _ => "bin",
        }
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.mime)
    }
}

impl Serialize for MediaFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.mime)
    }
}

/// Pick the first format in [`PREFERRED_FORMATS`] the factory supports
pub fn negotiate(factory: &dyn EncoderFactory) -> Result<MediaFormat, RecorderError> {
    for mime in PREFERRED_FORMATS {
        let format = MediaFormat::new(mime);
        if factory.supports(&format) {
            info!("Negotiated recording format: {}", format);
            return Ok(format);
        }
        debug!("Recording format not supported: {}", mime);
    }
    Err(RecorderError::NoSupportedFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parts() {
        let format = MediaFormat::new("video/webm;codecs=vp9,opus");
        assert_eq!(format.container(), "video/webm");
        assert_eq!(format.codecs(), vec!["vp9", "opus"]);
        assert_eq!(format.extension(), "webm");

        let plain = MediaFormat::new("video/webm");
        assert!(plain.codecs().is_empty());

        assert_eq!(MediaFormat::segment().extension(), "smx");
        assert_eq!(MediaFormat::segment().codecs(), vec!["rle", "pcm"]);
    }

    #[test]
    fn test_preference_ends_with_builtin() {
        assert_eq!(PREFERRED_FORMATS[0], "video/webm;codecs=vp9,opus");
        assert_eq!(PREFERRED_FORMATS[PREFERRED_FORMATS.len() - 1], SEGMENT_MIME);
    }

    #[test]
    fn test_serializes_as_mime_string() {
        let json = serde_json::to_string(&MediaFormat::segment()).unwrap();
        assert_eq!(json, format!("\"{}\"", SEGMENT_MIME));
    }
}
