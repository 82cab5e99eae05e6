//! Card Records - the unit of generated content
//!
//! A `CardRecord` is always structurally valid, whether it came from the
//! text service or from the fallback synthesizer. `origin` says which.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stat name -> value, in the order the stats were produced.
pub type Stats = IndexMap<String, u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Produced by the external generation service
    Service,
    /// Produced locally after the service failed
    Fallback,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Service => f.write_str("service"),
            Origin::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub name: String,
    pub description: String,
    pub image_prompt: String,
    pub stats: Stats,
    pub card_type: String,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_image: Option<PathBuf>,
}

impl CardRecord {
    pub fn stat_total(&self) -> u64 {
        stat_total(&self.stats)
    }

    pub fn rarity(&self, thresholds: &RarityThresholds) -> Rarity {
        thresholds.classify(&self.stats)
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == Origin::Fallback
    }

    /// The only mutation a record sees after creation.
    pub fn attach_render(&mut self, path: &Path) {
        self.rendered_image = Some(path.to_path_buf());
    }
}

pub fn stat_total(stats: &Stats) -> u64 {
    stats.values().map(|v| u64::from(*v)).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Rarity::Common => "Common",
            Rarity::Rare => "Rare",
            Rarity::Epic => "Epic",
            Rarity::Legendary => "Legendary",
        };
        f.write_str(label)
    }
}

/// Minimum stat totals for each tier above Common.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RarityThresholds {
    #[serde(default = "default_rare")]
    pub rare: u64,
    #[serde(default = "default_epic")]
    pub epic: u64,
    #[serde(default = "default_legendary")]
    pub legendary: u64,
}

fn default_rare() -> u64 { 11 }
fn default_epic() -> u64 { 16 }
fn default_legendary() -> u64 { 21 }

impl Default for RarityThresholds {
    fn default() -> Self {
        Self {
            rare: default_rare(),
            epic: default_epic(),
            legendary: default_legendary(),
        }
    }
}

impl RarityThresholds {
    pub fn classify(&self, stats: &Stats) -> Rarity {
        self.classify_total(stat_total(stats))
    }

    pub fn classify_total(&self, total: u64) -> Rarity {
        if total >= self.legendary {
            Rarity::Legendary
        } else if total >= self.epic {
            Rarity::Epic
        } else if total >= self.rare {
            Rarity::Rare
        } else {
            Rarity::Common
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.rare <= self.epic && self.epic <= self.legendary
    }
}
