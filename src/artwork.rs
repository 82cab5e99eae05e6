//! Card Artwork Generator
//!
//! Fetches artwork for an image prompt and persists it as the raw artwork
//! file. Any service failure, or a body that is not an image, is replaced by
//! the placeholder. Only a failure to write the file surfaces as an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::card::Origin;
use crate::fallback::PlaceholderArtwork;
use crate::services::{ImageService, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageKind {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
        }
    }
}

/// Identifies an image by its signature bytes.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(ImageKind::Png)
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageKind::Jpeg)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageKind::Gif)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageKind::Webp)
    } else {
        None
    }
}

/// Artwork bytes plus where they live on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ArtworkAsset {
    pub path: PathBuf,
    pub origin: Origin,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl ArtworkAsset {
    /// MIME type for embedding; unknown data is treated as PNG.
    pub fn mime(&self) -> &'static str {
        sniff_image(&self.bytes).map_or("image/png", |kind| kind.mime())
    }
}

#[derive(Debug, Error)]
pub enum ArtworkFailure {
    #[error("image service failed: {0}")]
    Service(#[from] ServiceError),

    #[error("response is not a decodable image ({0} bytes)")]
    NotAnImage(usize),
}

#[derive(Debug)]
pub enum ArtworkResult {
    Success(ArtworkAsset),
    Fallback { asset: ArtworkAsset, cause: ArtworkFailure },
}

impl ArtworkResult {
    pub fn asset(&self) -> &ArtworkAsset {
        match self {
            ArtworkResult::Success(asset) => asset,
            ArtworkResult::Fallback { asset, .. } => asset,
        }
    }

    pub fn into_parts(self) -> (ArtworkAsset, Option<ArtworkFailure>) {
        match self {
            ArtworkResult::Success(asset) => (asset, None),
            ArtworkResult::Fallback { asset, cause } => (asset, Some(cause)),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ArtworkResult::Fallback { .. })
    }
}

pub struct ArtworkGenerator {
    service: Arc<dyn ImageService>,
    placeholder: PlaceholderArtwork,
    size: [u32; 2],
}

impl ArtworkGenerator {
    /// `size` is the requested artwork resolution, independent of the card size.
    pub fn new(service: Arc<dyn ImageService>, placeholder: PlaceholderArtwork, size: [u32; 2]) -> Self {
        Self { service, placeholder, size }
    }

    /// Writes artwork for `image_prompt` to `destination`.
    pub fn generate(&self, image_prompt: &str, destination: &Path) -> io::Result<ArtworkResult> {
        match self.fetch(image_prompt) {
            Ok(bytes) => {
                write_file(destination, &bytes)?;
                info!("artwork written to {}", destination.display());
                Ok(ArtworkResult::Success(ArtworkAsset {
                    path: destination.to_path_buf(),
                    origin: Origin::Service,
                    bytes,
                }))
            }
            Err(cause) => {
                warn!("artwork for {} uses placeholder: {}", destination.display(), cause);
                let bytes = self.placeholder.write_to(destination)?;
                Ok(ArtworkResult::Fallback {
                    asset: ArtworkAsset {
                        path: destination.to_path_buf(),
                        origin: Origin::Fallback,
                        bytes,
                    },
                    cause,
                })
            }
        }
    }

    fn fetch(&self, image_prompt: &str) -> Result<Vec<u8>, ArtworkFailure> {
        let bytes = self.service.fetch(image_prompt, self.size)?;
        if sniff_image(&bytes).is_none() {
            return Err(ArtworkFailure::NotAnImage(bytes.len()));
        }
        Ok(bytes)
    }
}

fn write_file(destination: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(destination, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::EMBEDDED_PLACEHOLDER;
    use std::sync::Mutex;

    struct CannedImage {
        reply: Result<Vec<u8>, u16>,
        seen: Mutex<Vec<(String, [u32; 2])>>,
    }

    impl ImageService for CannedImage {
        fn fetch(&self, prompt: &str, size: [u32; 2]) -> Result<Vec<u8>, ServiceError> {
            self.seen.lock().unwrap().push((prompt.to_string(), size));
            self.reply.clone().map_err(ServiceError::Status)
        }
    }

    fn generator(reply: Result<Vec<u8>, u16>) -> (Arc<CannedImage>, ArtworkGenerator) {
        let service = Arc::new(CannedImage { reply, seen: Mutex::new(vec![]) });
        let generator = ArtworkGenerator::new(service.clone(), PlaceholderArtwork::default(), [512, 512]);
        (service, generator)
    }

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(sniff_image(EMBEDDED_PLACEHOLDER), Some(ImageKind::Png));
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xDB]), Some(ImageKind::Jpeg));
        assert_eq!(sniff_image(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageKind::Webp));
        assert_eq!(sniff_image(b"<html>rate limited</html>"), None);
    }

    #[test]
    fn service_image_is_written() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        let (service, generator) = generator(Ok(jpeg.clone()));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("raw.png");

        let result = generator.generate("a kraken", &dest).unwrap();
        assert!(!result.is_fallback());
        assert_eq!(result.asset().mime(), "image/jpeg");
        assert_eq!(fs::read(&dest).unwrap(), jpeg);
        assert_eq!(service.seen.lock().unwrap()[0], ("a kraken".to_string(), [512, 512]));
    }

    #[test]
    fn http_error_writes_placeholder() {
        let (_, generator) = generator(Err(503));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("raw.png");

        let (asset, cause) = generator.generate("a kraken", &dest).unwrap().into_parts();
        assert_eq!(asset.origin, Origin::Fallback);
        assert!(matches!(cause, Some(ArtworkFailure::Service(ServiceError::Status(503)))));
        assert_eq!(fs::read(&dest).unwrap(), EMBEDDED_PLACEHOLDER);
    }

    #[test]
    fn non_image_body_writes_placeholder() {
        let (_, generator) = generator(Ok(b"{\"error\": \"quota\"}".to_vec()));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("raw.png");

        let result = generator.generate("a kraken", &dest).unwrap();
        assert!(result.is_fallback());
        assert_eq!(result.asset().bytes, EMBEDDED_PLACEHOLDER);
    }
}
