//! Template Renderer
//!
//! Resolves a template's placeholder contract for one card and rasterizes
//! the result to an exact pixel size. Unlike the generators, failures here
//! are reported, not masked: a broken render setup is a local defect.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::artwork::ArtworkAsset;
use crate::card::{CardRecord, RarityThresholds, Stats};
use crate::templates::{Placeholder, Template};
use crate::themes::title_case;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("rasterizer `{0}` is not available")]
    EngineUnavailable(String),

    #[error("rasterizer exited with {status}: {stderr}")]
    EngineFailed { status: String, stderr: String },

    #[error("rasterizer output {0} is not a PNG")]
    CorruptOutput(PathBuf),

    #[error("rendered card is {actual:?}, expected {expected:?}")]
    DimensionMismatch { expected: [u32; 2], actual: [u32; 2] },

    #[error("placeholder {0} left unresolved")]
    UnresolvedPlaceholder(Placeholder),

    #[error("token {0} is not part of the placeholder contract")]
    UnknownToken(String),

    #[error("render I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RenderError {
    fn io(path: &Path, source: io::Error) -> Self {
        RenderError::Io { path: path.to_path_buf(), source }
    }
}

/// One rasterization request.
#[derive(Debug, Clone, Copy)]
pub struct RasterJob<'a> {
    pub document: &'a Path,
    pub output: &'a Path,
    pub size: [u32; 2],
}

/// HTML-to-image engine boundary.
pub trait Rasterizer: Send + Sync {
    /// Checks the engine can be launched at all.
    fn probe(&self) -> Result<(), RenderError>;

    /// Renders `job.document` to a PNG of exactly `job.size`, cropped at the origin.
    fn rasterize(&self, job: &RasterJob<'_>) -> Result<(), RenderError>;
}

/// `wkhtmltoimage` on the local machine.
#[derive(Debug, Clone)]
pub struct WkHtmlToImage {
    binary: PathBuf,
}

impl WkHtmlToImage {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    fn command_args(job: &RasterJob<'_>) -> Vec<String> {
        let [w, h] = job.size;
        vec![
            "--enable-local-file-access".into(),
            "--width".into(), w.to_string(),
            "--height".into(), h.to_string(),
            "--quality".into(), "100".into(),
            "--format".into(), "png".into(),
            "--disable-smart-width".into(),
            "--crop-h".into(), h.to_string(),
            "--crop-w".into(), w.to_string(),
            "--crop-x".into(), "0".into(),
            "--crop-y".into(), "0".into(),
            job.document.display().to_string(),
            job.output.display().to_string(),
        ]
    }

    fn unavailable(&self) -> RenderError {
        RenderError::EngineUnavailable(self.binary.display().to_string())
    }
}

impl Rasterizer for WkHtmlToImage {
    fn probe(&self) -> Result<(), RenderError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .map_err(|_| self.unavailable())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(self.unavailable())
        }
    }

    fn rasterize(&self, job: &RasterJob<'_>) -> Result<(), RenderError> {
        let output = Command::new(&self.binary)
            .args(Self::command_args(job))
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => self.unavailable(),
                _ => RenderError::io(&self.binary, e),
            })?;

        if !output.status.success() {
            return Err(RenderError::EngineFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Width and height from a PNG's IHDR chunk.
pub fn png_dimensions(bytes: &[u8]) -> Option<[u32; 2]> {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    if bytes.len() < 24 || bytes[..8] != SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    Some([width, height])
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedCard {
    pub path: PathBuf,
    pub size: [u32; 2],
}

pub struct TemplateRenderer {
    rasterizer: Arc<dyn Rasterizer>,
    rarity: RarityThresholds,
}

impl TemplateRenderer {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, rarity: RarityThresholds) -> Self {
        Self { rasterizer, rarity }
    }

    pub fn probe(&self) -> Result<(), RenderError> {
        self.rasterizer.probe()
    }

    /// Fills every contract slot; `index` is the 0-based slot.
    pub fn resolve(
        &self,
        record: &CardRecord,
        artwork: &ArtworkAsset,
        template: &Template,
        index: usize,
    ) -> Result<String, RenderError> {
        let values = [
            (Placeholder::CardName, escape_html(&record.name)),
            (Placeholder::CardType, escape_html(&title_case(&record.card_type))),
            (Placeholder::ImageData, data_uri(artwork)),
            (Placeholder::Description, escape_html(&record.description)),
            (Placeholder::Stats, stats_markup(&record.stats)),
            (Placeholder::Rarity, record.rarity(&self.rarity).to_string()),
            (Placeholder::Number, format!("{:03}", index + 1)),
        ];

        let mut document = template.markup.clone();
        for (placeholder, value) in &values {
            document = document.replace(placeholder.token(), value);
        }

        if let Some(p) = Placeholder::ALL.iter().find(|p| document.contains(p.token())) {
            return Err(RenderError::UnresolvedPlaceholder(*p));
        }
        // Substituted values have their braces escaped, so any token left came from the markup.
        if let Some(token) = leftover_token(&document) {
            return Err(RenderError::UnknownToken(token.to_string()));
        }
        Ok(document)
    }

    /// Resolves, rasterizes to `output`, and checks the result's dimensions.
    ///
    /// The intermediate HTML lives next to `output` under a unique name and
    /// is removed on every path out of this function.
    pub fn render(
        &self,
        record: &CardRecord,
        artwork: &ArtworkAsset,
        template: &Template,
        index: usize,
        output: &Path,
    ) -> Result<RenderedCard, RenderError> {
        let document = self.resolve(record, artwork, template, index)?;

        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(".render-")
            .suffix(".html")
            .tempfile_in(dir)
            .map_err(|e| RenderError::io(dir, e))?;
        let temp_path = temp.path().to_path_buf();
        temp.write_all(document.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| RenderError::io(&temp_path, e))?;

        debug!("rasterizing {} -> {}", temp_path.display(), output.display());
        self.rasterizer.rasterize(&RasterJob {
            document: &temp_path,
            output,
            size: template.card_size,
        })?;
        drop(temp);

        let bytes = fs::read(output).map_err(|_| RenderError::CorruptOutput(output.to_path_buf()))?;
        let actual = png_dimensions(&bytes).ok_or_else(|| RenderError::CorruptOutput(output.to_path_buf()))?;
        if actual != template.card_size {
            return Err(RenderError::DimensionMismatch { expected: template.card_size, actual });
        }

        Ok(RenderedCard { path: output.to_path_buf(), size: actual })
    }
}

/// First `{{...}}` token in `document`, if any.
fn leftover_token(document: &str) -> Option<&str> {
    let start = document.find("{{")?;
    let end = document[start..].find("}}")?;
    Some(&document[start..start + end + 2])
}

fn data_uri(artwork: &ArtworkAsset) -> String {
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &artwork.bytes);
    format!("data:{};base64,{}", artwork.mime(), encoded)
}

/// One labelled block per stat, in stat order.
pub fn stats_markup(stats: &Stats) -> String {
    if stats.is_empty() {
        return "No Stats Available".to_string();
    }
    stats
        .iter()
        .map(|(name, value)| {
            format!(
                r#"<div class="stat-item"><div class="stat-label">{}</div><div class="stat-value">{}</div></div>"#,
                escape_html(&name.to_uppercase()),
                value
            )
        })
        .collect()
}

/// Escapes markup characters and braces, so substituted text can never form a token.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '{' => out.push_str("&#123;"),
            '}' => out.push_str("&#125;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Origin;
    use crate::fallback::EMBEDDED_PLACEHOLDER;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Writes a PNG header of the requested size and remembers the document it saw.
    #[derive(Default)]
    struct HeaderOnlyRasterizer {
        calls: AtomicUsize,
        documents: Mutex<Vec<(PathBuf, String)>>,
        size_override: Option<[u32; 2]>,
    }

    impl Rasterizer for HeaderOnlyRasterizer {
        fn probe(&self) -> Result<(), RenderError> {
            Ok(())
        }

        fn rasterize(&self, job: &RasterJob<'_>) -> Result<(), RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let html = fs::read_to_string(job.document).unwrap();
            self.documents.lock().unwrap().push((job.document.to_path_buf(), html));
            let [w, h] = self.size_override.unwrap_or(job.size);
            let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
            png.extend_from_slice(b"IHDR");
            png.extend_from_slice(&w.to_be_bytes());
            png.extend_from_slice(&h.to_be_bytes());
            fs::write(job.output, png).unwrap();
            Ok(())
        }
    }

    struct BrokenRasterizer;

    impl Rasterizer for BrokenRasterizer {
        fn probe(&self) -> Result<(), RenderError> {
            Err(RenderError::EngineUnavailable("broken".into()))
        }

        fn rasterize(&self, _job: &RasterJob<'_>) -> Result<(), RenderError> {
            Err(RenderError::EngineFailed { status: "exit status: 1".into(), stderr: "boom".into() })
        }
    }

    fn markup() -> String {
        Placeholder::ALL
            .iter()
            .map(|p| format!("<p>{}</p>", p.token()))
            .collect()
    }

    fn record() -> CardRecord {
        let mut stats = Stats::new();
        stats.insert("Attack".into(), 9);
        stats.insert("Defense".into(), 8);
        CardRecord {
            name: "Ember <Drake> {{CARD_NAME}}".into(),
            description: "Breathes fire & smoke.".into(),
            image_prompt: "a red drake".into(),
            stats,
            card_type: "creature".into(),
            origin: Origin::Service,
            rendered_image: None,
        }
    }

    fn artwork() -> ArtworkAsset {
        ArtworkAsset {
            path: PathBuf::from("raw.png"),
            origin: Origin::Fallback,
            bytes: EMBEDDED_PLACEHOLDER.to_vec(),
        }
    }

    #[test]
    fn resolves_every_slot() {
        let renderer = TemplateRenderer::new(Arc::new(BrokenRasterizer), RarityThresholds::default());
        let doc = renderer
            .resolve(&record(), &artwork(), &Template::inline("t", "T", &markup()), 4)
            .unwrap();

        assert!(!doc.contains("{{"));
        assert!(doc.contains("Ember &lt;Drake&gt; &#123;&#123;CARD_NAME&#125;&#125;"));
        assert!(doc.contains("<p>Creature</p>"));
        assert!(doc.contains("data:image/png;base64,iVBORw0KGgo"));
        assert!(doc.contains("Breathes fire &amp; smoke."));
        assert!(doc.contains("<p>Epic</p>"));
        assert!(doc.contains("<p>005</p>"));
        let attack = doc.find("ATTACK").unwrap();
        let defense = doc.find("DEFENSE").unwrap();
        assert!(attack < defense);
    }

    #[test]
    fn token_outside_contract_is_never_rasterized() {
        let dir = tempfile::tempdir().unwrap();
        let raster = Arc::new(HeaderOnlyRasterizer::default());
        let renderer = TemplateRenderer::new(raster.clone(), RarityThresholds::default());
        let template = Template::inline("t", "T", &format!("{} {{{{CARD_FLAVOR}}}}", markup()));

        let err = renderer
            .render(&record(), &artwork(), &template, 0, &dir.path().join("card.png"))
            .unwrap_err();
        assert!(matches!(err, RenderError::UnknownToken(ref t) if t == "{{CARD_FLAVOR}}"));
        assert_eq!(raster.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_stats_render_notice() {
        assert_eq!(stats_markup(&Stats::new()), "No Stats Available");
    }

    #[test]
    fn renders_exact_size_and_removes_document() {
        let dir = tempfile::tempdir().unwrap();
        let raster = Arc::new(HeaderOnlyRasterizer::default());
        let renderer = TemplateRenderer::new(raster.clone(), RarityThresholds::default());
        let output = dir.path().join("card.png");

        let card = renderer
            .render(&record(), &artwork(), &Template::inline("t", "T", &markup()), 0, &output)
            .unwrap();

        assert_eq!(card.size, [428, 571]);
        assert_eq!(raster.calls.load(Ordering::SeqCst), 1);
        let (doc_path, html) = raster.documents.lock().unwrap()[0].clone();
        assert!(html.contains("<p>001</p>"));
        assert!(!doc_path.exists());
    }

    #[test]
    fn engine_failure_propagates_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = TemplateRenderer::new(Arc::new(BrokenRasterizer), RarityThresholds::default());
        let output = dir.path().join("card.png");

        let err = renderer
            .render(&record(), &artwork(), &Template::inline("t", "T", &markup()), 0, &output)
            .unwrap_err();

        assert!(matches!(err, RenderError::EngineFailed { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn wrong_output_size_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let raster = Arc::new(HeaderOnlyRasterizer {
            size_override: Some([428, 600]),
            ..Default::default()
        });
        let renderer = TemplateRenderer::new(raster, RarityThresholds::default());
        let err = renderer
            .render(&record(), &artwork(), &Template::inline("t", "T", &markup()), 0, &dir.path().join("c.png"))
            .unwrap_err();
        assert!(matches!(err, RenderError::DimensionMismatch { actual: [428, 600], .. }));
    }

    #[test]
    fn reads_png_header_dimensions() {
        assert_eq!(png_dimensions(EMBEDDED_PLACEHOLDER), Some([1, 1]));
        assert_eq!(png_dimensions(b"GIF89a"), None);
    }

    #[test]
    fn wkhtmltoimage_args_crop_at_origin() {
        let job = RasterJob { document: Path::new("in.html"), output: Path::new("out.png"), size: [350, 490] };
        let args = WkHtmlToImage::command_args(&job);
        let joined = args.join(" ");
        assert!(joined.contains("--width 350 --height 490"));
        assert!(joined.contains("--crop-h 490 --crop-w 350 --crop-x 0 --crop-y 0"));
        assert!(joined.ends_with("in.html out.png"));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let engine = WkHtmlToImage::new("/nonexistent/wkhtmltoimage");
        assert!(matches!(engine.probe(), Err(RenderError::EngineUnavailable(_))));
    }
}
