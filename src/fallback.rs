//! Fallbacks - deterministic, network-free substitutes
//!
//! Used whenever an external generation call fails. Both are total: they
//! never produce an invalid record or an empty image.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;

use crate::card::{CardRecord, Origin, Stats};
use crate::themes::title_case;

const FALLBACK_STAT_VALUES: [u32; 3] = [3, 2, 4];

/// Builds a generic card for `(theme, card_type)`.
///
/// `ordinal` is the 1-based slot number; it keeps names distinct within a
/// batch when the same card type comes round twice.
pub fn synthesize_card(theme: &str, card_type: &str, stat_keys: &[String], ordinal: usize) -> CardRecord {
    let theme = theme.trim();
    let theme_label = if theme.is_empty() { "Generic".to_string() } else { title_case(theme) };
    let theme_text = if theme.is_empty() { "generic" } else { theme };

    let stats: Stats = stat_keys
        .iter()
        .zip(FALLBACK_STAT_VALUES.iter().cycle())
        .map(|(key, value)| (key.clone(), *value))
        .collect();

    CardRecord {
        name: format!("{} {} {}", theme_label, title_case(card_type), ordinal),
        description: format!("A {} card for the {} theme.", card_type, theme_text),
        image_prompt: format!("A {} {} card artwork, digital art, detailed", theme_text, card_type),
        stats,
        card_type: card_type.to_string(),
        origin: Origin::Fallback,
        rendered_image: None,
    }
}

/// Minimal 1x1 transparent PNG
pub const EMBEDDED_PLACEHOLDER: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A,
    0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
    0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41,
    0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00,
    0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// Supplies placeholder artwork.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderArtwork {
    source: Option<PathBuf>,
}

impl PlaceholderArtwork {
    pub fn new(source: Option<PathBuf>) -> Self {
        Self { source }
    }

    /// The configured image if it can be read, the embedded PNG otherwise.
    pub fn bytes(&self) -> Vec<u8> {
        if let Some(path) = &self.source {
            match fs::read(path) {
                Ok(bytes) if !bytes.is_empty() => return bytes,
                Ok(_) => warn!("placeholder image {} is empty, using embedded image", path.display()),
                Err(e) => warn!("cannot read placeholder image {}: {}", path.display(), e),
            }
        }
        EMBEDDED_PLACEHOLDER.to_vec()
    }

    /// Writes the placeholder to `destination` and returns its bytes.
    pub fn write_to(&self, destination: &Path) -> io::Result<Vec<u8>> {
        let bytes = self.bytes();
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(destination, &bytes)?;
        Ok(bytes)
    }
}
