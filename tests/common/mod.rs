//! Test doubles for the pipeline's external collaborators.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use deckforge_core::render::RasterJob;
use deckforge_core::services::{ImageService, ServiceError, TextService};
use deckforge_core::{Collaborators, Config, Pipeline, Rasterizer, RenderError, TemplateRegistry};
use tempfile::TempDir;

/// Signature plus IHDR, enough for dimension checks.
pub fn png_header(size: [u32; 2]) -> Vec<u8> {
    let [w, h] = size;
    let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
    png.extend_from_slice(b"IHDR");
    png.extend_from_slice(&w.to_be_bytes());
    png.extend_from_slice(&h.to_be_bytes());
    png.extend_from_slice(&[8, 6, 0, 0, 0]);
    png
}

/// Answers every prompt with a well-formed card, or fails every time.
pub struct ScriptedText {
    calls: AtomicUsize,
    fail: bool,
}

impl ScriptedText {
    pub fn working() -> Self {
        Self { calls: AtomicUsize::new(0), fail: false }
    }

    pub fn failing() -> Self {
        Self { calls: AtomicUsize::new(0), fail: true }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextService for ScriptedText {
    fn complete(&self, _prompt: &str) -> Result<String, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(ServiceError::Status(503));
        }
        Ok(serde_json::json!({
            "name": format!("Captain Redbeard {}", n),
            "description": "Terror of the seven seas.",
            "image_prompt": "a pirate captain on a stormy deck",
            "stats": {"Power": 5, "Cost": 3, "Health": 4},
            "card_type": "character",
        })
        .to_string())
    }
}

pub struct ScriptedImage {
    calls: AtomicUsize,
    fail: bool,
}

impl ScriptedImage {
    pub fn working() -> Self {
        Self { calls: AtomicUsize::new(0), fail: false }
    }

    pub fn failing() -> Self {
        Self { calls: AtomicUsize::new(0), fail: true }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageService for ScriptedImage {
    fn fetch(&self, _prompt: &str, size: [u32; 2]) -> Result<Vec<u8>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ServiceError::Timeout);
        }
        Ok(png_header(size))
    }
}

/// Writes a PNG header of the job's size instead of running a browser engine.
#[derive(Default)]
pub struct FakeRasterizer {
    pub calls: AtomicUsize,
    /// 1-based call number that fails
    pub fail_on_call: Option<usize>,
    pub unavailable: bool,
    pub documents: Mutex<Vec<String>>,
}

impl FakeRasterizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Rasterizer for FakeRasterizer {
    fn probe(&self) -> Result<(), RenderError> {
        if self.unavailable {
            Err(RenderError::EngineUnavailable("fake".into()))
        } else {
            Ok(())
        }
    }

    fn rasterize(&self, job: &RasterJob<'_>) -> Result<(), RenderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let html = fs::read_to_string(job.document).unwrap();
        self.documents.lock().unwrap().push(html);
        if self.fail_on_call == Some(n) {
            return Err(RenderError::EngineFailed {
                status: "exit status: 1".into(),
                stderr: "simulated crash".into(),
            });
        }
        fs::write(job.output, png_header(job.size)).unwrap();
        Ok(())
    }
}

pub fn templates_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates")
}

/// The templates shipped with the crate.
pub fn shipped_registry() -> Arc<TemplateRegistry> {
    Arc::new(TemplateRegistry::discover(&templates_dir()).unwrap())
}

pub struct Harness {
    pub text: Arc<ScriptedText>,
    pub image: Arc<ScriptedImage>,
    pub rasterizer: Arc<FakeRasterizer>,
    pub pipeline: Pipeline,
    pub out: TempDir,
}

impl Harness {
    pub fn new(text: ScriptedText, image: ScriptedImage, rasterizer: FakeRasterizer, workers: usize) -> Self {
        let text = Arc::new(text);
        let image = Arc::new(image);
        let rasterizer = Arc::new(rasterizer);
        let config = Config { workers, ..Config::default() };
        let pipeline = Pipeline::new(
            &config,
            shipped_registry(),
            Collaborators {
                text: text.clone(),
                image: image.clone(),
                rasterizer: rasterizer.clone(),
            },
        )
        .unwrap();
        Self { text, image, rasterizer, pipeline, out: TempDir::new().unwrap() }
    }

    pub fn healthy() -> Self {
        Self::new(ScriptedText::working(), ScriptedImage::working(), FakeRasterizer::default(), 1)
    }

    pub fn service_calls(&self) -> usize {
        self.text.calls() + self.image.calls()
    }
}
