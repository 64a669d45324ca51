use anyhow::Context;
use clap::Parser;
use game_prototypes::{EngineConfig, PrototypeManager, SchemaManifest};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proto-graph-export")]
#[command(about = "Export prototype inheritance graphs to DOT/SVG format")]
struct Cli {
    /// Content directory
    dir: PathBuf,

    /// Schema manifest (TOML or JSON)
    #[arg(short, long, default_value = "schemas.toml")]
    schemas: PathBuf,

    /// Kind to export (defaults to every inheriting kind)
    #[arg(short, long)]
    kind: Option<String>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Output format: dot or svg
    #[arg(short, long, default_value = "dot")]
    format: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.format != "dot" && cli.format != "svg" {
        eprintln!("❌ Invalid format. Use 'dot' or 'svg'");
        std::process::exit(1);
    }

    let manifest = SchemaManifest::from_path(&cli.schemas)?;
    let mut manager = PrototypeManager::with_config(EngineConfig::load()?);
    manager.register_provider(&manifest)?;

    println!("Loading prototypes from: {:?}", cli.dir);
    manager.load_directory(&cli.dir, false)?;

    let kinds: Vec<String> = match &cli.kind {
        Some(kind) => vec![kind.clone()],
        None => manager.kind_names().into_iter().map(String::from).collect(),
    };

    std::fs::create_dir_all(&cli.output)?;
    for kind in kinds {
        let kind_data = manager.registry().expect_kind(&kind)?;
        let Some(graph) = &kind_data.inheritance else {
            if cli.kind.is_some() {
                eprintln!("❌ Kind '{}' does not support inheritance", kind);
                std::process::exit(1);
            }
            continue;
        };

        println!("{}: {} prototypes, {} edges", kind, graph.len(), graph.edges().len());
        let dot_content = graph.to_dot(&kind);
        let dot_path = cli.output.join(format!("{}.dot", kind));
        std::fs::write(&dot_path, &dot_content)?;

        if cli.format == "dot" {
            println!("✅ Exported DOT to: {:?}", dot_path);
            continue;
        }

        // GraphViz renders the SVG next to the DOT file
        let svg_path = dot_path.with_extension("svg");
        let output = std::process::Command::new("dot")
            .arg("-Tsvg")
            .arg(&dot_path)
            .arg("-o")
            .arg(&svg_path)
            .output()
            .context("running GraphViz `dot`")?;
        let _ = std::fs::remove_file(&dot_path);

        if output.status.success() {
            println!("✅ Exported SVG to: {:?}", svg_path);
        } else {
            eprintln!("❌ GraphViz conversion failed:");
            eprintln!("{}", String::from_utf8_lossy(&output.stderr));
            std::process::exit(1);
        }
    }

    Ok(())
}
