//! DeckForge CLI
//!
//! Commands: templates, generate, doctor
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on request validation failure

use clap::{Parser, Subcommand};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use deckforge_core::{
    package_batch, Config, GenerationRequest, Pipeline, Rasterizer, TemplateRegistry, WkHtmlToImage,
};

#[derive(Parser)]
#[command(name = "deckforge-cli")]
#[command(about = "DeckForge CLI - themed trading card deck generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to templates directory (overrides config)
    #[arg(short, long)]
    templates_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates,

    /// Generate and package a deck
    Generate {
        /// Deck theme, e.g. "Pirates"
        #[arg(long)]
        theme: String,

        /// Number of cards (1-20)
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// Template ID (defaults to the first registered template)
        #[arg(long)]
        template: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },

    /// Check the local installation
    Doctor {
        /// Output directory to check for writability
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .try_init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            println!("{}", serde_json::json!({"success": false, "error": e.to_string()}));
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = cli.templates_dir {
        config.templates_dir = dir;
    }

    let registry = match TemplateRegistry::discover(&config.templates_dir) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            println!("{}", serde_json::json!({"success": false, "error": format!("Failed to load templates: {}", e)}));
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Templates => {
            print_json(&serde_json::json!(registry.list()));
            ExitCode::SUCCESS
        }

        Commands::Generate { theme, count, template, output } => {
            generate(&config, registry, theme, count, template, output)
        }

        Commands::Doctor { output } => doctor(&config, &registry, &output),
    }
}

fn generate(
    config: &Config,
    registry: Arc<TemplateRegistry>,
    theme: String,
    count: usize,
    template: Option<String>,
    output: PathBuf,
) -> ExitCode {
    let template_id = match template.or_else(|| registry.first().map(|t| t.id.clone())) {
        Some(id) => id,
        None => {
            print_json(&serde_json::json!({"success": false, "error": "No templates available"}));
            return ExitCode::from(2);
        }
    };

    let pipeline = match Pipeline::from_config(config, registry) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            print_json(&serde_json::json!({"success": false, "error": e.to_string()}));
            return ExitCode::FAILURE;
        }
    };

    let request = GenerationRequest { theme, count, template_id, output_dir: output };
    let run = match pipeline.spawn(request) {
        Ok(run) => run,
        Err(e) => {
            print_json(&serde_json::json!({"success": false, "error": e.to_string()}));
            return ExitCode::FAILURE;
        }
    };

    for event in run.events.iter() {
        info!("[{}/{}] {}: {}", event.slot + 1, event.total, event.stage, event.message);
    }

    let batch = match run.join() {
        Ok(b) => b,
        Err(e) => {
            error!("{}", e);
            print_json(&serde_json::json!({"success": false, "error": e.to_string()}));
            return if e.is_validation() { ExitCode::from(2) } else { ExitCode::FAILURE };
        }
    };

    match package_batch(&batch, &config.rarity) {
        Ok(report) => {
            let cards: Vec<_> = batch
                .entries
                .iter()
                .map(|entry| serde_json::json!({
                    "name": entry.record.name,
                    "cardType": entry.record.card_type,
                    "origin": entry.record.origin,
                    "artworkOrigin": entry.artwork.origin,
                    "rendered": entry.rendered.as_ref().ok().map(|c| &c.path),
                    "renderError": entry.rendered.as_ref().err().map(|e| e.to_string()),
                }))
                .collect();
            print_json(&serde_json::json!({
                "success": true,
                "archive": report.archive,
                "manifestHash": report.manifest.manifest_hash,
                "cards": cards,
            }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("packaging failed: {}", e);
            print_json(&serde_json::json!({"success": false, "error": e.to_string()}));
            ExitCode::FAILURE
        }
    }
}

fn doctor(config: &Config, registry: &TemplateRegistry, output: &Path) -> ExitCode {
    let rasterizer = WkHtmlToImage::new(config.rasterizer.clone());
    let raster_check = rasterizer.probe().map_err(|e| e.to_string());
    let template_check = if registry.is_empty() {
        Err(format!("no valid templates in {}", config.templates_dir.display()))
    } else {
        Ok(())
    };
    let output_check = check_writable(output);

    let checks = [
        ("rasterizer", raster_check),
        ("templates", template_check),
        ("output", output_check),
    ];
    let ok = checks.iter().all(|(_, r)| r.is_ok());
    let report: serde_json::Map<_, _> = checks
        .iter()
        .map(|(name, result)| {
            let value = match result {
                Ok(()) => serde_json::json!({"ok": true}),
                Err(e) => serde_json::json!({"ok": false, "error": e}),
            };
            (name.to_string(), value)
        })
        .collect();

    print_json(&serde_json::json!({
        "ok": ok,
        "templates": registry.list().iter().map(|t| &t.id).collect::<Vec<_>>(),
        "checks": report,
    }));
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn check_writable(dir: &Path) -> Result<(), String> {
    fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
    tempfile::tempfile_in(dir)
        .map(|_| ())
        .map_err(|e| format!("cannot write to {}: {}", dir.display(), e))
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("cannot encode output: {}", e),
    }
}
