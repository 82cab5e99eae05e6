//! DeckForge Core - themed trading card deck generator
//!
//! # Pipeline
//! For every card slot: card data -> artwork -> rendered card.
//! 1. External services are unreliable; their failures degrade to fallbacks
//! 2. Templates are contracts, checked once when the registry is built
//! 3. Render failures are reported per slot, never masked
//! 4. A batch always holds exactly the number of cards requested

pub mod card;
pub mod themes;
pub mod fallback;
pub mod services;
pub mod card_data;
pub mod artwork;
pub mod templates;
pub mod validation;
pub mod render;
pub mod progress;
pub mod pipeline;
pub mod package;
pub mod hashing;
pub mod config;

pub use card::{CardRecord, Origin, Rarity, RarityThresholds, Stats};
pub use card_data::{CardDataGenerator, GenerationFailure, GenerationResult};
pub use artwork::{ArtworkAsset, ArtworkGenerator, ArtworkResult};
pub use templates::{Placeholder, Template, TemplateId, TemplateRegistry, TemplateError};
pub use validation::{ValidationResult, ValidationRule, ValidationViolation, ViolationSeverity};
pub use render::{Rasterizer, RenderError, RenderedCard, TemplateRenderer, WkHtmlToImage};
pub use progress::{ProgressEvent, ProgressSink, Stage};
pub use pipeline::{Batch, BatchEntry, Collaborators, GenerationRequest, Pipeline, PipelineError, RunHandle};
pub use package::{package_batch, PackageError, PackageReport};
pub use config::{Config, ConfigError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_TEMPLATE_VERSION: &str = "1.0.0";
