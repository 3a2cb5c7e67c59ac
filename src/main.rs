//! quadfuse CLI: federated RDF quad fusion.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;

use quadfuse::canon::{UriEquivalences, save_uri_set};
use quadfuse::config::FusionConfig;
use quadfuse::executor::FusionExecutor;
use quadfuse::loader::ExternalSortLoader;

#[derive(Parser)]
#[command(name = "quadfuse", version, about = "Federated RDF quad fusion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a fusion run.
    Run {
        /// Path to the fusion config (TOML).
        #[arg(long)]
        config: PathBuf,
    },

    /// Validate a fusion config without running it.
    Check {
        /// Path to the fusion config (TOML).
        #[arg(long)]
        config: PathBuf,
    },

    /// Build the canonical URI mapping and report on it.
    Mapping {
        /// Path to the fusion config (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Write the canonical representatives to this file.
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = FusionConfig::load(&config)?;
            config.validate()?;

            let canon = build_mapping(&config)?;
            let sources = config.build_sources();
            let descriptions = ExternalSortLoader::load(
                &sources,
                &canon,
                &config.loader_config(),
                &config.work_dir(),
            )?;
            let loader_stats = descriptions.stats();

            let mut sink = config.build_sink()?;
            let executor = FusionExecutor::new(
                config.strategy_table()?,
                config.scoring(),
                config.description_predicate_set(),
                config.executor_config(),
            );
            let stats = executor.run(descriptions, sink.as_mut())?;

            println!("{stats}");
            println!("  quads copied:    {}", loader_stats.quads_copied);
            println!("  dependent links: {}", loader_stats.dependent_links);
            if loader_stats.subjects_dropped > 0 {
                println!("  quads dropped:   {}", loader_stats.subjects_dropped);
            }
        }

        Commands::Check { config } => {
            let path = config.clone();
            let config = FusionConfig::load(&config)?;
            config.validate()?;
            println!("Configuration OK: {}", path.display());
            println!("  sources:             {}", config.sources.len());
            println!("  equivalence sources: {}", config.equivalence_sources.len());
            println!("  sinks:               {}", config.sinks.len());
            println!("  strategies:          {}", config.strategies.len());
        }

        Commands::Mapping { config, save } => {
            let config = FusionConfig::load(&config)?;
            let canon = build_mapping(&config)?;
            let representatives = canon.representatives();

            println!("Canonical URI mapping:");
            println!("  mapped identifiers: {}", canon.mapped_len());
            println!("  equivalence classes: {}", representatives.len());

            if let Some(path) = save {
                save_uri_set(&path, representatives.iter().copied())?;
                println!("  saved representatives to {}", path.display());
            }
        }
    }

    Ok(())
}

/// Build the canonical mapping from the configured equivalence sources and
/// preferred-identifier set.
fn build_mapping(config: &FusionConfig) -> Result<quadfuse::canon::CanonicalUriMap> {
    let preferred = config.preferred_set()?;
    let equivalence_sources = config.build_equivalence_sources();
    let equivalences = UriEquivalences::collect(
        &equivalence_sources,
        &config.equivalence_predicate_set(),
        &config.retry_config(),
    )?;
    Ok(equivalences.build(&preferred))
}
