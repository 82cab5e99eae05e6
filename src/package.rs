//! Packaging - turns a finished batch into a distributable deck
//!
//! Writes one JSON file per card, the rules text, a README and a hashed
//! manifest into the project directory, then zips exactly the files this
//! batch produced. Any batch the pipeline returns can be packaged; only
//! filesystem errors fail.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::card::{CardRecord, Origin, Rarity, RarityThresholds};
use crate::hashing::{compute_manifest_hash, sha256_hex};
use crate::pipeline::Batch;
use crate::themes::title_case;
use crate::ENGINE_VERSION;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl PackageError {
    fn io(path: &Path, source: io::Error) -> Self {
        PackageError::Io { path: path.to_path_buf(), source }
    }
}

/// Card JSON as shipped in the deck.
#[derive(Debug, Serialize)]
struct CardExport<'a> {
    #[serde(flatten)]
    record: &'a CardRecord,
    rarity: Rarity,
    number: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestCard {
    pub index: usize,
    pub name: String,
    pub card_type: String,
    pub rarity: Rarity,
    pub data_origin: Origin,
    pub artwork_origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestFile {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
    pub theme: String,
    pub template_id: String,
    pub template_name: String,
    pub template_version: String,
    pub request_hash: String,
    pub cards: Vec<ManifestCard>,
    pub files: Vec<ManifestFile>,
    pub manifest_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub archive: PathBuf,
    pub manifest: Manifest,
}

pub fn package_batch(batch: &Batch, rarity: &RarityThresholds) -> Result<PackageReport, PackageError> {
    let project = &batch.project_dir;
    let cards_dir = batch.cards_dir();
    let game_info = project.join("game_info");
    create_dir(&cards_dir)?;
    create_dir(&game_info)?;

    for entry in &batch.entries {
        let export = CardExport {
            record: &entry.record,
            rarity: entry.record.rarity(rarity),
            number: entry.index + 1,
        };
        let path = cards_dir.join(format!("{}.json", entry.file_stem));
        write_file(&path, serde_json::to_string_pretty(&export)?.as_bytes())?;
    }

    let records: Vec<&CardRecord> = batch.records().collect();
    write_file(
        &game_info.join("game_rules.txt"),
        game_rules(&batch.theme, &batch.template_name, &records).as_bytes(),
    )?;
    write_file(
        &project.join("README.md"),
        readme(&batch.theme, &batch.template_name, &records, rarity).as_bytes(),
    )?;

    let mut files = batch_files(batch);
    let manifest = build_manifest(batch, rarity, &files)?;
    let manifest_path = project.join(MANIFEST_FILE);
    write_file(&manifest_path, serde_json::to_string_pretty(&manifest)?.as_bytes())?;
    files.push(manifest_path);

    let archive = archive_path(project);
    write_archive(project, &files, &archive)?;
    info!("packaged {} card(s) into {}", batch.len(), archive.display());

    Ok(PackageReport { archive, manifest })
}

fn archive_path(project: &Path) -> PathBuf {
    let mut name = project.as_os_str().to_os_string();
    name.push(".zip");
    PathBuf::from(name)
}

fn build_manifest(batch: &Batch, rarity: &RarityThresholds, paths: &[PathBuf]) -> Result<Manifest, PackageError> {
    let cards = batch
        .entries
        .iter()
        .map(|entry| ManifestCard {
            index: entry.index,
            name: entry.record.name.clone(),
            card_type: entry.record.card_type.clone(),
            rarity: entry.record.rarity(rarity),
            data_origin: entry.record.origin,
            artwork_origin: entry.artwork.origin,
            data_failure: entry.data_failure.as_ref().map(|e| e.to_string()),
            artwork_failure: entry.artwork_failure.as_ref().map(|e| e.to_string()),
            render_error: entry.rendered.as_ref().err().map(|e| e.to_string()),
        })
        .collect();

    let mut files = vec![];
    for path in paths {
        let data = fs::read(path).map_err(|e| PackageError::io(path, e))?;
        files.push(ManifestFile {
            path: archive_name(&batch.project_dir, path),
            bytes: data.len() as u64,
            sha256: sha256_hex(&data),
        });
    }

    let mut manifest = Manifest {
        run_id: batch.run_id,
        created_at: batch.created_at,
        engine_version: ENGINE_VERSION.to_string(),
        theme: batch.theme.clone(),
        template_id: batch.template_id.clone(),
        template_name: batch.template_name.clone(),
        template_version: batch.template_version.clone(),
        request_hash: batch.request_hash.clone(),
        cards,
        files,
        manifest_hash: String::new(), // Computed after
    };
    manifest.manifest_hash = compute_manifest_hash(&manifest)?;
    Ok(manifest)
}

/// Rules text: basic rules plus one line per card type, in first-seen order.
pub fn game_rules(theme: &str, template_name: &str, cards: &[&CardRecord]) -> String {
    let mut types: Vec<&str> = vec![];
    for card in cards {
        if !types.contains(&card.card_type.as_str()) {
            types.push(&card.card_type);
        }
    }

    let mut rules = format!(
        "Card Game: {}\n{}\n\nTemplate Style: {}\n\n\
         BASIC RULES:\n\
         - Each player starts with a deck of cards\n\
         - Draw cards from your deck each turn\n\
         - Play cards to attack opponents or defend yourself\n\
         - Use card stats to determine outcomes\n\
         - First player to reduce opponent's health to 0 wins!\n\n\
         CARD TYPES:\n",
        title_case(theme),
        "=".repeat(50),
        template_name
    );
    for card_type in types {
        rules.push_str(&format!("- {}: Special abilities and effects\n", title_case(card_type)));
    }
    rules.push_str(&format!(
        "\nGenerated {} unique cards for your {} themed game!\n",
        cards.len(),
        theme
    ));
    rules
}

pub fn readme(theme: &str, template_name: &str, cards: &[&CardRecord], rarity: &RarityThresholds) -> String {
    let mut content = format!(
        "# {} Card Game\n\n\
         **Template Style:** {}\n\n\
         ## Contents\n\
         - `cards/`: card data (JSON), raw artwork and rendered cards (PNG)\n\
         - `game_info/`: game rules\n\
         - `{}`: file digests and generation details\n\n\
         ## Cards Generated\n",
        title_case(theme),
        template_name,
        MANIFEST_FILE
    );
    for (i, card) in cards.iter().enumerate() {
        content.push_str(&format!(
            "{}. **{}** ({}, {}): {}\n",
            i + 1,
            card.name,
            card.card_type,
            card.rarity(rarity),
            card.description
        ));
    }
    content
}

fn create_dir(path: &Path) -> Result<(), PackageError> {
    fs::create_dir_all(path).map_err(|e| PackageError::io(path, e))
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), PackageError> {
    fs::write(path, data).map_err(|e| PackageError::io(path, e))
}

/// The files this batch produced, in slot order, followed by the shared texts.
///
/// Leftovers from earlier runs in the same project directory are never listed.
fn batch_files(batch: &Batch) -> Vec<PathBuf> {
    let cards_dir = batch.cards_dir();
    let mut files = vec![];
    for entry in &batch.entries {
        files.push(cards_dir.join(format!("{}.json", entry.file_stem)));
        files.push(entry.artwork.path.clone());
        if let Ok(card) = &entry.rendered {
            files.push(card.path.clone());
        }
    }
    files.push(batch.project_dir.join("game_info").join("game_rules.txt"));
    files.push(batch.project_dir.join("README.md"));
    files
}

/// Path relative to `root` with `/` separators.
fn archive_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_archive(project: &Path, files: &[PathBuf], archive: &Path) -> Result<(), PackageError> {
    let file = File::create(archive).map_err(|e| PackageError::io(archive, e))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for path in files {
        let data = fs::read(path).map_err(|e| PackageError::io(path, e))?;
        zip.start_file(archive_name(project, path), options)?;
        zip.write_all(&data).map_err(|e| PackageError::io(archive, e))?;
    }
    zip.finish()?;
    Ok(())
}
