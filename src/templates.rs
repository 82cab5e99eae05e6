//! Template System - Placeholder Contracts
//!
//! A template is a JSON descriptor plus an HTML markup file. The registry is
//! built once at startup, rejects templates that break the placeholder
//! contract, and is read-only afterwards.

use indexmap::IndexMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::validation::{ValidationResult, Validator};

pub type TemplateId = String;

pub const DEFAULT_CARD_SIZE: [u32; 2] = [428, 571];

/// The named slots every template must expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    CardName,
    CardType,
    ImageData,
    Description,
    Stats,
    Rarity,
    Number,
}

impl Placeholder {
    pub const ALL: [Placeholder; 7] = [
        Placeholder::CardName,
        Placeholder::CardType,
        Placeholder::ImageData,
        Placeholder::Description,
        Placeholder::Stats,
        Placeholder::Rarity,
        Placeholder::Number,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Placeholder::CardName => "{{CARD_NAME}}",
            Placeholder::CardType => "{{CARD_TYPE}}",
            Placeholder::ImageData => "{{CARD_IMAGE_URL}}",
            Placeholder::Description => "{{CARD_DESCRIPTION}}",
            Placeholder::Stats => "{{CARD_STATS}}",
            Placeholder::Rarity => "{{CARD_RARITY}}",
            Placeholder::Number => "{{CARD_NUMBER}}",
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// On-disk descriptor (`<id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDescriptor {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template_version: String,
    pub engine_min_version: String,
    /// Markup file, relative to the descriptor
    pub markup: PathBuf,
    #[serde(default = "default_card_size")]
    pub card_size: [u32; 2],
}

fn default_card_size() -> [u32; 2] { DEFAULT_CARD_SIZE }

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub description: String,
    pub template_version: String,
    pub engine_min_version: String,
    pub card_size: [u32; 2],
    #[serde(skip)]
    pub markup: String,
}

impl Template {
    pub fn from_descriptor(descriptor: TemplateDescriptor, markup: String) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.name,
            description: descriptor.description,
            template_version: descriptor.template_version,
            engine_min_version: descriptor.engine_min_version,
            card_size: descriptor.card_size,
            markup,
        }
    }

    /// Builds a template directly from markup with default metadata.
    pub fn inline(id: &str, name: &str, markup: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            template_version: "1.0.0".to_string(),
            engine_min_version: crate::MIN_TEMPLATE_VERSION.to_string(),
            card_size: DEFAULT_CARD_SIZE,
            markup: markup.to_string(),
        }
    }

    pub fn missing_placeholders(&self) -> Vec<Placeholder> {
        Placeholder::ALL
            .into_iter()
            .filter(|p| !self.markup.contains(p.token()))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("cannot read template directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Template registry - discovered once, shared read-only
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<TemplateId, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: IndexMap::new() }
    }

    /// Scans `dir` for descriptors in file-name order.
    ///
    /// Unreadable or contract-breaking templates are skipped with a warning.
    /// A missing directory yields an empty registry.
    pub fn discover(dir: &Path) -> Result<Self, TemplateError> {
        let mut registry = Self::new();
        if !dir.exists() {
            warn!("template directory {} does not exist", dir.display());
            return Ok(registry);
        }

        let io_err = |source| TemplateError::Io { path: dir.to_path_buf(), source };
        let mut descriptors = vec![];
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().map_or(false, |e| e == "json") {
                descriptors.push(path);
            }
        }
        descriptors.sort();

        let validator = Validator::new();
        for path in descriptors {
            let template = match load_template(&path) {
                Ok(t) => t,
                Err(reason) => {
                    warn!("skipping template {}: {}", path.display(), reason);
                    continue;
                }
            };
            let result = registry.register_with(&validator, template);
            if !result.valid {
                warn!(
                    "skipping template {}: {}",
                    path.display(),
                    result.error_summary()
                );
            }
        }

        info!("{} template(s) registered from {}", registry.len(), dir.display());
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Result<&Template, TemplateError> {
        self.templates
            .get(id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<&Template> {
        self.templates.values().collect()
    }

    pub fn first(&self) -> Option<&Template> {
        self.templates.values().next()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Validates and inserts; the template is only registered when valid.
    pub fn register(&mut self, template: Template) -> ValidationResult {
        self.register_with(&Validator::new(), template)
    }

    fn register_with(&mut self, validator: &Validator, template: Template) -> ValidationResult {
        let mut result = validator.validate(&template);
        if result.valid && self.templates.contains_key(&template.id) {
            result = result.rejected_as_duplicate();
        }
        if result.valid {
            self.templates.insert(template.id.clone(), template);
        }
        result
    }
}

fn load_template(descriptor_path: &Path) -> Result<Template, String> {
    let content = fs::read_to_string(descriptor_path).map_err(|e| e.to_string())?;
    let descriptor: TemplateDescriptor =
        serde_json::from_str(&content).map_err(|e| format!("invalid descriptor: {}", e))?;

    let base = descriptor_path.parent().unwrap_or_else(|| Path::new("."));
    let markup_path = base.join(&descriptor.markup);
    let markup = fs::read_to_string(&markup_path)
        .map_err(|e| format!("cannot read markup {}: {}", markup_path.display(), e))?;

    Ok(Template::from_descriptor(descriptor, markup))
}
