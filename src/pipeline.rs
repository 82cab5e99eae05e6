//! Generation Pipeline - Single Entry Point
//!
//! Validates the request, then runs every slot through
//! card data -> artwork -> render. Generator failures degrade to fallbacks;
//! a render failure is kept on its slot. The batch always has one entry per
//! requested card.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use log::{error, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::artwork::{ArtworkAsset, ArtworkFailure, ArtworkGenerator};
use crate::card::CardRecord;
use crate::card_data::{CardDataGenerator, CardRequest, GenerationFailure};
use crate::config::{Config, ConfigError};
use crate::fallback::PlaceholderArtwork;
use crate::hashing::compute_request_hash;
use crate::progress::{self, ProgressEvent, ProgressReceiver, ProgressSink, Stage};
use crate::render::{Rasterizer, RenderError, RenderedCard, TemplateRenderer, WkHtmlToImage};
use crate::services::{HttpImageService, HttpTextService, ImageService, ServiceError, TextService};
use crate::templates::{Template, TemplateError, TemplateRegistry};
use crate::themes::{slug, ThemeTable};
use crate::ENGINE_VERSION;

pub const MIN_CARDS: usize = 1;
pub const MAX_CARDS: usize = 20;

const MAX_STEM_CHARS: usize = 48;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Card count {0} is out of range (1-20)")]
    InvalidCount(usize),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Rasterizer unavailable: {0}")]
    RasterizerUnavailable(String),

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Service setup failed: {0}")]
    ServiceSetup(#[from] ServiceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Errors caused by the request itself rather than the environment.
    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::InvalidCount(_) | PipelineError::TemplateNotFound(_))
    }

    fn filesystem(path: &Path, source: io::Error) -> Self {
        PipelineError::Filesystem { path: path.to_path_buf(), source }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub theme: String,
    pub count: usize,
    pub template_id: String,
    pub output_dir: PathBuf,
}

/// Everything one slot produced.
#[derive(Debug)]
pub struct BatchEntry {
    pub index: usize,
    /// Shared base name of this slot's files
    pub file_stem: String,
    pub record: CardRecord,
    pub data_failure: Option<GenerationFailure>,
    pub artwork: ArtworkAsset,
    pub artwork_failure: Option<ArtworkFailure>,
    pub rendered: Result<RenderedCard, RenderError>,
}

#[derive(Debug)]
pub struct Batch {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub theme: String,
    pub template_id: String,
    pub template_name: String,
    pub template_version: String,
    pub request_hash: String,
    pub project_dir: PathBuf,
    pub entries: Vec<BatchEntry>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &CardRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    pub fn fallback_count(&self) -> usize {
        self.entries.iter().filter(|e| e.record.is_fallback()).count()
    }

    pub fn render_failures(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| e.rendered.is_err())
    }

    pub fn cards_dir(&self) -> PathBuf {
        self.project_dir.join("cards")
    }
}

/// `<output>/<theme slug>_card_game`
pub fn project_dir(output_dir: &Path, theme: &str) -> PathBuf {
    output_dir.join(format!("{}_card_game", slug(theme)))
}

/// The external boundaries a pipeline talks to.
pub struct Collaborators {
    pub text: Arc<dyn TextService>,
    pub image: Arc<dyn ImageService>,
    pub rasterizer: Arc<dyn Rasterizer>,
}

struct SlotPlan<'a> {
    theme: &'a str,
    template: &'a Template,
    card_types: Vec<String>,
    stat_keys: &'a [String],
    cards_dir: PathBuf,
    progress: &'a dyn ProgressSink,
}

impl SlotPlan<'_> {
    fn report(&self, slot: usize, stage: Stage, message: String) {
        self.progress.emit(ProgressEvent {
            slot,
            total: self.card_types.len(),
            stage,
            message,
        });
    }
}

/// The generation pipeline - single entry point for deck runs
pub struct Pipeline {
    registry: Arc<TemplateRegistry>,
    data: CardDataGenerator,
    artwork: ArtworkGenerator,
    renderer: TemplateRenderer,
    themes: ThemeTable,
    workers: usize,
}

impl Pipeline {
    /// Fails when `config` does not validate.
    pub fn new(
        config: &Config,
        registry: Arc<TemplateRegistry>,
        collaborators: Collaborators,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            registry,
            data: CardDataGenerator::new(collaborators.text),
            artwork: ArtworkGenerator::new(
                collaborators.image,
                PlaceholderArtwork::new(config.placeholder_image.clone()),
                config.artwork_size,
            ),
            renderer: TemplateRenderer::new(collaborators.rasterizer, config.rarity),
            themes: config.themes.clone(),
            workers: config.workers.max(1),
        })
    }

    /// Pipeline backed by the HTTP services and wkhtmltoimage.
    pub fn from_config(config: &Config, registry: Arc<TemplateRegistry>) -> Result<Self, PipelineError> {
        let timeout = config.request_timeout();
        let collaborators = Collaborators {
            text: Arc::new(HttpTextService::new(&config.text_api_url, &config.text_model, timeout)?),
            image: Arc::new(HttpImageService::new(&config.image_api_url, &config.image_model, timeout)?),
            rasterizer: Arc::new(WkHtmlToImage::new(config.rasterizer.clone())),
        };
        Self::new(config, registry, collaborators)
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Checks count and template before anything touches the network or disk.
    pub fn validate_request(&self, request: &GenerationRequest) -> Result<&Template, PipelineError> {
        if !(MIN_CARDS..=MAX_CARDS).contains(&request.count) {
            return Err(PipelineError::InvalidCount(request.count));
        }
        self.registry.get(&request.template_id).map_err(|e| match e {
            TemplateError::NotFound(id) => PipelineError::TemplateNotFound(id),
            TemplateError::Io { path, source } => PipelineError::Filesystem { path, source },
        })
    }

    /// Runs a whole batch on the calling thread.
    pub fn run(&self, request: &GenerationRequest, progress: &dyn ProgressSink) -> Result<Batch, PipelineError> {
        let template = self.validate_request(request)?;
        self.renderer
            .probe()
            .map_err(|e| PipelineError::RasterizerUnavailable(e.to_string()))?;

        let project_dir = project_dir(&request.output_dir, &request.theme);
        let cards_dir = project_dir.join("cards");
        fs::create_dir_all(&cards_dir).map_err(|e| PipelineError::filesystem(&cards_dir, e))?;

        let run_id = Uuid::new_v4();
        info!(
            "run {}: {} card(s) for theme \"{}\" with template {}",
            run_id, request.count, request.theme, template.id
        );

        let plan = SlotPlan {
            theme: &request.theme,
            template,
            card_types: self.themes.card_types(&request.theme, request.count),
            stat_keys: &self.themes.lookup(&request.theme).stat_keys,
            cards_dir,
            progress,
        };

        let workers = self.workers.min(request.count);
        let entries = if workers <= 1 {
            (0..request.count)
                .map(|i| self.run_slot(&plan, i))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("deckforge-slot-{}", i))
                .build()
                .map_err(|e| PipelineError::Worker(e.to_string()))?;
            pool.install(|| {
                (0..request.count)
                    .into_par_iter()
                    .map(|i| self.run_slot(&plan, i))
                    .collect::<Result<Vec<_>, _>>()
            })?
        };

        let batch = Batch {
            run_id,
            created_at: Utc::now(),
            theme: request.theme.clone(),
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            template_version: template.template_version.clone(),
            request_hash: compute_request_hash(
                &request.theme,
                request.count,
                &template.id,
                &template.template_version,
                ENGINE_VERSION,
            ),
            project_dir,
            entries,
        };
        info!(
            "run {}: {} card(s), {} fallback, {} render failure(s)",
            run_id,
            batch.len(),
            batch.fallback_count(),
            batch.render_failures().count()
        );
        Ok(batch)
    }

    /// Runs a batch on a background thread; progress arrives on the handle's receiver.
    pub fn spawn(self: Arc<Self>, request: GenerationRequest) -> Result<RunHandle, PipelineError> {
        let (tx, events) = progress::channel();
        let handle = thread::Builder::new()
            .name("deckforge-run".to_string())
            .spawn(move || self.run(&request, &tx))
            .map_err(|e| PipelineError::Worker(format!("cannot start run thread: {}", e)))?;
        Ok(RunHandle { events, handle })
    }

    fn run_slot(&self, plan: &SlotPlan<'_>, index: usize) -> Result<BatchEntry, PipelineError> {
        let card_type = &plan.card_types[index];

        let generated = self.data.generate(&CardRequest {
            theme: plan.theme,
            card_type,
            stat_keys: plan.stat_keys,
            ordinal: index + 1,
        });
        let (mut record, data_failure) = generated.into_parts();
        let message = match &data_failure {
            None => format!("Generated card data for \"{}\" ({})", record.name, card_type),
            Some(cause) => format!("Using fallback card data for {}: {}", card_type, cause),
        };
        plan.report(index, Stage::CardData, message);

        let file_stem = format!(
            "{}_{}",
            slug(&record.name).chars().take(MAX_STEM_CHARS).collect::<String>(),
            index
        );
        let raw_path = plan.cards_dir.join(format!("raw_{}.png", file_stem));
        let (artwork, artwork_failure) = self
            .artwork
            .generate(&record.image_prompt, &raw_path)
            .map_err(|e| PipelineError::filesystem(&raw_path, e))?
            .into_parts();
        let message = match &artwork_failure {
            None => format!("Generated artwork for \"{}\"", record.name),
            Some(cause) => format!("Using placeholder artwork for \"{}\": {}", record.name, cause),
        };
        plan.report(index, Stage::Artwork, message);

        let card_path = plan.cards_dir.join(format!("{}.png", file_stem));
        let rendered = self
            .renderer
            .render(&record, &artwork, plan.template, index, &card_path);
        let message = match &rendered {
            Ok(card) => {
                record.attach_render(&card.path);
                format!("Rendered card \"{}\"", record.name)
            }
            Err(e) => {
                error!("card {}: render failed: {}", index + 1, e);
                format!("Render failed for \"{}\": {}", record.name, e)
            }
        };
        plan.report(index, Stage::Render, message);

        Ok(BatchEntry {
            index,
            file_stem,
            record,
            data_failure,
            artwork,
            artwork_failure,
            rendered,
        })
    }
}

/// A batch running on its own thread.
pub struct RunHandle {
    pub events: ProgressReceiver,
    handle: JoinHandle<Result<Batch, PipelineError>>,
}

impl RunHandle {
    /// Waits for the run to finish.
    pub fn join(self) -> Result<Batch, PipelineError> {
        self.handle
            .join()
            .map_err(|_| PipelineError::Worker("run thread panicked".to_string()))?
    }
}
