//! Prototype Validator CLI
//!
//! Validates a content directory against a schema manifest, or loads and
//! resolves it to report per-record failures.

use anyhow::Context;
use clap::{Parser, Subcommand};
use game_prototypes::{EngineConfig, PrototypeManager, SchemaManifest, ValidationReport};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proto-validator")]
#[command(about = "Validate prototype content against a schema manifest")]
struct Cli {
    /// Schema manifest (TOML or JSON)
    #[arg(short, long, default_value = "schemas.toml")]
    schemas: PathBuf,

    /// Engine configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Structural validation without instantiating anything
    Check {
        /// Content directory
        dir: PathBuf,

        /// Write a JSON report here
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Load and resolve the content, reporting every failed record
    Load {
        /// Content directory
        dir: PathBuf,

        /// Print category memberships
        #[arg(long)]
        categories: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = EngineConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    let manifest = SchemaManifest::from_path(&cli.schemas)?;

    let mut manager = PrototypeManager::with_config(config);
    manager.register_provider(&manifest)?;
    manager.register_component_categories(manifest.component_table());
    for field in &manifest.static_references {
        manager.register_static_reference(field.clone());
    }

    match cli.command {
        Commands::Check { dir, report } => {
            println!("🔍 Validating {}...", dir.display());
            let result = manager.validate_directory(&dir)?;
            print_validation(&result);

            if let Some(path) = report {
                let json = serde_json::json!({
                    "generated_at": chrono::Utc::now().to_rfc3339(),
                    "directory": dir,
                    "ok": result.is_ok(),
                    "report": &result,
                });
                std::fs::write(&path, serde_json::to_string_pretty(&json)?)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("✅ Report written to {:?}", path);
            }

            Ok(result.is_ok())
        }

        Commands::Load { dir, categories } => {
            println!("📦 Loading {}...", dir.display());
            let load = manager.load_directory(&dir, false)?;
            let resolve = manager.resolve();

            for name in manager.kind_names() {
                println!("  {} - {} prototypes", name, manager.count(name)?);
            }

            let mut diagnostics = load.diagnostics;
            diagnostics.merge(resolve.diagnostics);
            if !diagnostics.is_empty() {
                println!();
                print!("{}", diagnostics.format_all());
            }

            if categories {
                let index = manager.categories()?;
                let entity_kind = &manager.config().categories.entity_kind;
                println!();
                for prototype in manager.enumerate(entity_kind)? {
                    let found = index.categories_of(prototype.id());
                    if !found.is_empty() {
                        let hidden = if index.is_hidden(prototype.id()) { " (hidden)" } else { "" };
                        println!("  {}: {}{}", prototype.id(), found.join(", "), hidden);
                    }
                }
            }

            println!();
            if diagnostics.has_errors() {
                println!("❌ {} error(s), {} warning(s)", diagnostics.error_count(), diagnostics.warning_count());
                Ok(false)
            } else {
                println!("✅ Loaded {} file(s)", load.files_read);
                Ok(true)
            }
        }
    }
}

fn print_validation(report: &ValidationReport) {
    for (file, items) in &report.file_errors {
        println!();
        println!("❌ {}", file.display());
        for item in items {
            println!("   └─ {}", item);
        }
    }

    if !report.static_errors.is_empty() {
        println!();
        println!("❌ Static references");
        for error in &report.static_errors {
            println!("   └─ {}", error);
        }
    }

    println!();
    if report.is_ok() {
        println!(
            "✅ {} file(s), {} record(s) - all valid",
            report.files_checked, report.records_checked
        );
    } else {
        println!(
            "❌ {} error(s) in {} file(s), {} static reference error(s)",
            report.error_count(),
            report.file_errors.len(),
            report.static_errors.len()
        );
    }
}
