//! Theme Categories
//!
//! Maps a free-text theme onto a closed set of card categories and the
//! stat names cards of that theme carry. Unrecognized themes get the
//! generic set.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySet {
    /// Lower-case theme names this set answers for
    #[serde(default)]
    pub themes: Vec<String>,
    pub categories: Vec<String>,
    pub stat_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeTable {
    pub sets: Vec<CategorySet>,
    pub generic: CategorySet,
}

impl Default for ThemeTable {
    fn default() -> Self {
        Self {
            sets: vec![
                category_set(
                    &["fantasy", "medieval", "magic"],
                    &["creature", "spell", "artifact", "enchantment", "hero"],
                    &["Attack", "Defense", "Mana"],
                ),
                category_set(
                    &["sci-fi", "science fiction", "futuristic", "space"],
                    &["robot", "tech", "weapon", "vehicle", "alien"],
                    &["Power", "Shield", "Energy"],
                ),
            ],
            generic: category_set(
                &[],
                &["character", "action", "item", "location", "event"],
                &["Power", "Cost", "Health"],
            ),
        }
    }
}

fn category_set(themes: &[&str], categories: &[&str], stat_keys: &[&str]) -> CategorySet {
    CategorySet {
        themes: themes.iter().map(|s| s.to_string()).collect(),
        categories: categories.iter().map(|s| s.to_string()).collect(),
        stat_keys: stat_keys.iter().map(|s| s.to_string()).collect(),
    }
}

impl ThemeTable {
    pub fn lookup(&self, theme: &str) -> &CategorySet {
        let key = theme.trim().to_lowercase();
        self.sets
            .iter()
            .find(|set| set.themes.iter().any(|t| *t == key))
            .unwrap_or(&self.generic)
    }

    /// Card type for each of `count` slots, cycling through the categories.
    pub fn card_types(&self, theme: &str, count: usize) -> Vec<String> {
        let set = self.lookup(theme);
        if set.categories.is_empty() {
            return vec![];
        }
        (0..count)
            .map(|i| set.categories[i % set.categories.len()].clone())
            .collect()
    }

    /// Every set must be usable for slot selection and fallback stats.
    pub fn check(&self) -> Result<(), String> {
        for set in self.sets.iter().chain(std::iter::once(&self.generic)) {
            if set.categories.is_empty() {
                return Err(format!("category set {:?} has no categories", set.themes));
            }
            if set.stat_keys.is_empty() {
                return Err(format!("category set {:?} has no stat keys", set.themes));
            }
        }
        Ok(())
    }
}

/// Upper-cases the first letter of every alphabetic run and lower-cases the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// Lower-case, filesystem-safe form of a theme or card name.
pub fn slug(text: &str) -> String {
    let slug: String = text
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_themes_are_case_insensitive() {
        let table = ThemeTable::default();
        assert_eq!(table.lookup("  Sci-Fi ").categories[0], "robot");
        assert_eq!(table.lookup("FANTASY").stat_keys[0], "Attack");
    }

    #[test]
    fn unknown_theme_uses_generic_set() {
        let table = ThemeTable::default();
        assert_eq!(table.lookup("Pirates"), &table.generic);
    }

    #[test]
    fn card_types_cycle() {
        let table = ThemeTable::default();
        let types = table.card_types("Pirates", 7);
        assert_eq!(types.len(), 7);
        assert_eq!(types[0], "character");
        assert_eq!(types[5], "character");
        assert_eq!(types[6], "action");
    }

    #[test]
    fn title_case_matches_word_boundaries() {
        assert_eq!(title_case("sci-fi robot"), "Sci-Fi Robot");
        assert_eq!(title_case("PIRATES"), "Pirates");
    }

    #[test]
    fn slug_replaces_separators() {
        assert_eq!(slug("Deep Space 9!"), "deep_space_9_");
        assert_eq!(slug("   "), "untitled");
    }

    #[test]
    fn check_rejects_empty_sets() {
        let mut table = ThemeTable::default();
        table.generic.categories.clear();
        assert!(table.check().is_err());
    }
}
