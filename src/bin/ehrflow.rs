//! ehrflow CLI: maps source documents into compositions.
//!
//! Usage:
//!   ehrflow run --config settings.yml <documents...>
//!   ehrflow check --config settings.yml

use clap::{Parser, Subcommand};
use ehrflow::emit::composition::TemplateBuilder;
use ehrflow::emit::delivery::{Archive, DeliveryMode, DispatchDelivery, RepositoryDelivery};
use ehrflow::{
    config, load_document, AttributeCatalog, Collaborators, CompositionSink, Engine, EngineConfig,
    FhirTerminologyClient, MdrClient, RuleTable, Settings, WalkReport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ehrflow",
    version,
    about = "Hierarchical mapping and merge engine for clinical documents"
)]
struct Cli {
    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk documents and emit compositions
    Run {
        /// Path to the settings file
        #[arg(short, long)]
        config: PathBuf,
        /// Source documents (JSON or YAML), processed in order
        #[arg(required = true)]
        documents: Vec<PathBuf>,
    },
    /// Validate settings and print the rule table
    Check {
        /// Path to the settings file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: &Path) -> Result<Settings, String> {
    config::load(path).map_err(|e| format!("Failed to load settings: {}", e))
}

fn print_rules(rules: &RuleTable) {
    for rule in rules.iter() {
        let path = if rule.path.is_empty() { "(root)" } else { rule.path.as_str() };
        let conversion = match &rule.conversion {
            Some(c) => format!("{} -> {}", c.source, c.target),
            None => "(no conversion)".to_string(),
        };
        let template = rule.template_id.as_deref().unwrap_or("-");
        let split = if rule.split { "  split" } else { "" };
        println!("{:<40} {:<40} {}{}", path, conversion, template, split);
    }
}

fn cmd_check(config: &Path) -> i32 {
    let settings = match load_settings(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let rules = settings.rule_table();
    println!(
        "{} rules, depth limit {}, delivery {:?}",
        rules.len(),
        settings.depth_limit,
        settings.delivery
    );
    print_rules(&rules);
    0
}

/// Connect every collaborator the settings name and assemble the engine.
async fn open_engine(settings: &Settings) -> Result<Engine, String> {
    let rules = Arc::new(settings.rule_table());
    let (Some(mdr), Some(tx)) = (settings.mdr.clone(), settings.terminology.as_ref()) else {
        return Err("run requires the mdr and terminology sections".to_string());
    };

    let mdr = Arc::new(
        MdrClient::connect(mdr)
            .await
            .map_err(|e| format!("Failed to log in to the MDR: {}", e))?,
    );
    let attributes = AttributeCatalog::load(mdr.as_ref(), &rules.target_profiles())
        .await
        .map_err(|e| format!("Failed to load field attributes: {}", e))?;
    let terminology = FhirTerminologyClient::new(tx)
        .map_err(|e| format!("Failed to set up terminology client: {}", e))?;

    let archive = match &settings.output_dir {
        Some(dir) => Some(Arc::new(Archive::new(dir).map_err(|e| {
            format!("Failed to open output directory {}: {}", dir.display(), e)
        })?)),
        None => None,
    };

    let builder = Arc::new(TemplateBuilder::new(rules.template_ids()));
    let mut sink = CompositionSink::new(builder, settings.subject_field.clone());
    if let Some(archive) = &archive {
        sink = sink.with_archive(archive.clone());
    }
    match settings.delivery {
        DeliveryMode::None => {}
        DeliveryMode::Raw => {
            let repository = settings
                .open_ehr
                .clone()
                .ok_or_else(|| "raw delivery requires the openEhr section".to_string())?;
            let delivery = RepositoryDelivery::new(repository)
                .map_err(|e| format!("Failed to set up repository delivery: {}", e))?;
            let missing = delivery
                .missing_templates(&rules.template_ids())
                .await
                .map_err(|e| format!("Failed to look up templates: {}", e))?;
            if !missing.is_empty() {
                return Err(format!(
                    "templates not found in the repository: {}",
                    missing.join(", ")
                ));
            }
            sink = sink.with_delivery(Arc::new(delivery));
        }
        DeliveryMode::Xds => {
            let xds = settings
                .xds
                .as_ref()
                .ok_or_else(|| "xds delivery requires the xds section".to_string())?;
            let mut delivery = DispatchDelivery::new(xds)
                .map_err(|e| format!("Failed to set up envelope dispatch: {}", e))?;
            if let Some(archive) = &archive {
                delivery = delivery.with_archive(archive.clone());
            }
            sink = sink.with_delivery(Arc::new(delivery));
        }
    }

    Ok(Engine::new(
        EngineConfig {
            rules,
            attributes: Arc::new(attributes),
            depth_limit: settings.depth_limit,
        },
        Collaborators {
            converter: mdr,
            terminology: Arc::new(terminology),
            sink: Arc::new(sink),
        },
    ))
}

fn print_report(document: &Path, report: &WalkReport) {
    println!(
        "{}: {} node-sets, {} rules applied, {} emitted, {} failures",
        document.display(),
        report.visited,
        report.applied.len(),
        report.emitted.len(),
        report.failures.len()
    );
    for failure in &report.failures {
        let path = if failure.path.is_empty() { "(root)" } else { failure.path.as_str() };
        println!("  {}: {}", path, failure.kind);
    }
}

async fn run(config: &Path, documents: &[PathBuf]) -> i32 {
    let settings = match load_settings(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let engine = match open_engine(&settings).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let mut skipped = 0;
    for path in documents {
        let document = match load_document(path) {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "skipping document");
                eprintln!("Error: {}", e);
                skipped += 1;
                continue;
            }
        };
        info!(document = %path.display(), "walking document");
        let report = engine.walk_document(&document).await;
        print_report(path, &report);
    }

    if skipped > 0 {
        1
    } else {
        0
    }
}

fn cmd_run(config: &Path, documents: &[PathBuf]) -> i32 {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };
    rt.block_on(run(config, documents))
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let code = match cli.command {
        Commands::Run { config, documents } => cmd_run(&config, &documents),
        Commands::Check { config } => cmd_check(&config),
    };
    std::process::exit(code);
}
