//! Rebase CLI
//!
//! - `rebase migrate`: move a project's families and system types onto a
//!   template catalog and write the migrated document plus a JSON run report
//! - `rebase catalog`: print the collected catalog of one category
//! - `rebase config`: print the default configuration as TOML
//!
//! Documents are JSON snapshots of the in-memory host.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rebase_document::MemoryDocument;
use rebase_engine::{
    collect, filter_in_use, CancellationToken, CategoryDescriptor, FailureMode, RebaseConfig,
    RebasePipeline, RunOutcome, RunResult,
};
use rebase_llm::{DisabledGateway, LlmMappingGateway, MappingGateway, UnifiedClient};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rebase")]
#[command(
    author,
    version,
    about = "Rebase a project's families and system types onto a template catalog"
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
    /// Migrate a project document onto a template document
    Migrate {
        /// Project document (JSON)
        #[arg(long)]
        source: PathBuf,
        /// Template document (JSON), read-only
        #[arg(long)]
        template: PathBuf,
        /// Run configuration (TOML); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Where to write the migrated document; nothing is saved without it
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Where to write the run result (JSON)
        #[arg(long)]
        report: Option<PathBuf>,
        /// Skip the AI mapping gateway (exact matches only)
        #[arg(long)]
        no_ai: bool,
        /// Roll back any transaction with an error instead of resolving it
        #[arg(long)]
        strict: bool,
    },

    /// Print the catalog of one category as JSON
    Catalog {
        /// Document (JSON)
        #[arg(long)]
        doc: PathBuf,
        /// Category name, e.g. "Furniture" or "Walls"
        #[arg(long)]
        category: String,
        /// Treat the category as system types rather than loadable families
        #[arg(long)]
        system: bool,
        /// Only entries with at least one directly placed instance
        #[arg(long)]
        in_use: bool,
    },

    /// Print the default configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Migrate {
            source,
            template,
            config,
            out,
            report,
            no_ai,
            strict,
        } => cmd_migrate(
            &source,
            &template,
            config.as_deref(),
            out.as_deref(),
            report.as_deref(),
            no_ai,
            strict,
        ),
        Commands::Catalog {
            doc,
            category,
            system,
            in_use,
        } => cmd_catalog(&doc, &category, system, in_use),
        Commands::Config => {
            print!("{}", RebaseConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

// ============================================================================
// migrate
// ============================================================================

fn load_config(path: Option<&Path>, no_ai: bool, strict: bool) -> Result<RebaseConfig> {
    let mut config = match path {
        Some(path) => RebaseConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RebaseConfig::default(),
    };
    if no_ai {
        config.use_ai = false;
    }
    if strict {
        config.failure_mode = FailureMode::Strict;
    }
    Ok(config)
}

/// The LLM gateway from the environment, or a disabled one when AI mapping
/// is off or not configured.
fn build_gateway(use_ai: bool) -> Arc<dyn MappingGateway> {
    if !use_ai {
        return Arc::new(DisabledGateway);
    }
    match UnifiedClient::from_env() {
        Ok(client) => Arc::new(LlmMappingGateway::new(Arc::new(client))),
        Err(err) => {
            eprintln!(
                "{} AI mapping unavailable ({err}); continuing with exact matches only",
                "info:".yellow().bold()
            );
            Arc::new(DisabledGateway)
        }
    }
}

fn cmd_migrate(
    source_path: &Path,
    template_path: &Path,
    config_path: Option<&Path>,
    out: Option<&Path>,
    report_path: Option<&Path>,
    no_ai: bool,
    strict: bool,
) -> Result<()> {
    let config = load_config(config_path, no_ai, strict)?;
    let mut source = MemoryDocument::load(source_path)
        .with_context(|| format!("loading {}", source_path.display()))?;
    let template = MemoryDocument::load(template_path)
        .with_context(|| format!("loading {}", template_path.display()))?;

    eprintln!(
        "{} {} onto {}",
        "Migrating".green().bold(),
        source_path.display(),
        template_path.display()
    );

    let pipeline = RebasePipeline::new(config.clone(), build_gateway(config.use_ai));
    let cancel = CancellationToken::new();
    let runtime = tokio::runtime::Runtime::new()?;

    let run = runtime.block_on(async {
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} finishing the current step, then stopping", "cancel:".yellow().bold());
                on_signal.cancel();
            }
        });

        let progress = |stage: &str| eprintln!("  {} {stage}", "→".cyan());
        pipeline
            .run_full_migration(&mut source, &template, Some(&progress), Some(&cancel))
            .await
    });

    print_summary(&run);

    if let Some(path) = report_path {
        fs::write(path, serde_json::to_string_pretty(&run)?)?;
        eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
    }

    match &run.outcome {
        RunOutcome::Failed(message) => Err(anyhow!("migration failed: {message}")),
        RunOutcome::Cancelled => {
            eprintln!(
                "{} cancelled; committed steps are kept in memory but not saved",
                "info:".yellow().bold()
            );
            Ok(())
        }
        RunOutcome::Completed | RunOutcome::CompletedWithErrors => {
            match out {
                Some(path) => {
                    source
                        .save(path)
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
                }
                None => eprintln!(
                    "{} no --out given, migrated document not saved",
                    "info:".yellow().bold()
                ),
            }
            Ok(())
        }
    }
}

fn print_summary(run: &RunResult) {
    let label = match &run.outcome {
        RunOutcome::Completed => "ok".green().bold(),
        RunOutcome::CompletedWithErrors => "completed with errors".yellow().bold(),
        RunOutcome::Cancelled => "cancelled".yellow().bold(),
        RunOutcome::Failed(_) => "failed".red().bold(),
    };
    println!("{} run {} in {} ms", label, run.run_id, run.duration_ms);

    for category in &run.categories {
        println!(
            "  {} {:<22} entries {:>4}  exact {:>4}  ai {:>4}  switched {:>5}  renamed {:>4}  deleted {:>4}",
            "→".cyan(),
            category.category,
            category.total_entries,
            category.exact_matches,
            category.ai_mapped,
            category.switched_instances,
            category.renamed,
            category.deleted,
        );
        if category.skipped_nested + category.skipped_grouped > 0 {
            println!(
                "    {} {} nested, {} grouped instances left on old types",
                "→".yellow(),
                category.skipped_nested,
                category.skipped_grouped
            );
        }
    }

    if run.parameters_added + run.parameters_removed > 0 {
        println!(
            "  {} parameters: {} added, {} removed",
            "→".cyan(),
            run.parameters_added,
            run.parameters_removed
        );
    }
    println!(
        "  {} total: {} switched, {} renamed, {} deleted",
        "→".cyan(),
        run.switched_instances,
        run.renamed,
        run.deleted
    );

    for error in &run.errors {
        println!("  {} {}", "error:".red().bold(), error);
    }
}

// ============================================================================
// catalog
// ============================================================================

fn cmd_catalog(doc_path: &Path, category: &str, system: bool, in_use: bool) -> Result<()> {
    let doc = MemoryDocument::load(doc_path)
        .with_context(|| format!("loading {}", doc_path.display()))?;
    let descriptor = if system {
        CategoryDescriptor::system_types(category)
    } else {
        CategoryDescriptor::families(category)
    };

    let mut catalog = collect(&doc, &descriptor)?;
    if in_use {
        catalog = filter_in_use(&doc, &catalog);
    }
    let entries: Vec<_> = catalog.entries().collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
