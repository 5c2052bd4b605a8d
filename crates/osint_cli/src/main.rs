use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use osint_core::{Article, Config};
use osint_scrapers::{init_logging, ScraperManager};
use osint_storage::{reindex, DocumentStore, IndexKind};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "osint", author, version, about = "Collects cybersecurity news into a searchable article store")]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Use a throwaway in-memory store instead of Elasticsearch
    #[arg(long, global = true)]
    memory: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the article index if it does not exist
    Init,
    /// Discover, extract and store new articles from every profile
    Scrape,
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Rebuild an index with the current mapping, keeping its documents
    Reindex {
        #[arg(long, default_value = "articles")]
        index: IndexKind,
    },
    /// Write every stored article to a JSON file
    Export { file: PathBuf },
    /// Load articles from a JSON file, skipping URLs already stored
    Import { file: PathBuf },
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },
    Keywords {
        #[command(subcommand)]
        command: KeywordCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommands {
    /// List loaded profiles
    List,
    /// Scrape one profile without storing anything
    Test {
        name: String,
        /// Scrape this article instead of running discovery
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum MaintenanceCommands {
    /// Recompute the tags of every stored article
    RegenerateTags,
    /// Move articles whose id no longer matches their URL
    UpdateIds,
}

#[derive(Subcommand, Debug)]
enum KeywordCommands {
    /// Report malformed keyword records
    Verify,
}

fn build_manager(config: &Config, memory: bool) -> anyhow::Result<ScraperManager> {
    let engine = osint_storage::create_engine(config, memory)?;
    let store = DocumentStore::<Article>::new(engine, config.engine.article_index.clone())
        .with_chunk_size(config.engine.chunk_size);
    let manager = ScraperManager::from_config(config, store).context("loading profiles and keyword files")?;
    info!(profiles = manager.registry().len(), "🦗 scrapers initialized");
    Ok(manager)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env().context("reading configuration")?;
    let manager = build_manager(&config, cli.memory)?;

    match cli.command {
        Commands::Init => {
            if manager.prepare_store().await? {
                println!("Created index {}", config.engine.article_index);
            } else {
                println!("Index {} already exists", config.engine.article_index);
            }
        }
        Commands::Scrape => {
            manager.prepare_store().await?;
            let report = manager.run_pipeline().await?;
            for profile in &report.profiles {
                println!(
                    "{:<24} discovered {:>3}  new {:>3}  stored {:>3}  failed {:>3}",
                    profile.profile, profile.discovered, profile.new, profile.stored, profile.failed
                );
            }
            println!("Stored {} articles ({} failed)", report.stored(), report.failed());
        }
        Commands::Profiles { command } => match command {
            ProfileCommands::List => {
                for profile in manager.registry().iter() {
                    println!(
                        "{:<24} {:<9} {}",
                        profile.profile_name,
                        profile.retrieval_method().to_string(),
                        profile.name
                    );
                }
            }
            ProfileCommands::Test { name, url } => {
                let results = manager.test_profile(&name, url.as_deref()).await?;
                let mut failed = 0;
                for result in &results {
                    match result {
                        Ok(article) => {
                            println!("✅ {}", article.url);
                            println!("   title:     {}", article.title);
                            println!("   published: {}", article.publish_date.to_rfc3339());
                            println!("   author:    {}", article.author.as_deref().unwrap_or("-"));
                            println!("   tags:      {}", article.tags.automatic.join(", "));
                            println!("   content:   {} characters", article.content.len());
                        }
                        Err(e) => {
                            failed += 1;
                            println!("❌ {}", e);
                        }
                    }
                }
                if failed > 0 {
                    bail!("{} of {} articles failed for profile {}", failed, results.len(), name);
                }
            }
        },
        Commands::Reindex { index } => {
            let name = match index {
                IndexKind::Articles => config.engine.article_index.clone(),
            };
            let report = reindex(manager.store().engine().as_ref(), &name, &index.mapping()).await?;
            println!("Reindexed {} ({} documents)", report.index, report.documents);
        }
        Commands::Export { file } => {
            let count = manager.export_json(&file).await?;
            println!("Exported {} articles to {}", count, file.display());
        }
        Commands::Import { file } => {
            manager.prepare_store().await?;
            let report = manager.import_json(&file).await?;
            println!(
                "Imported {} of {} articles ({} already stored)",
                report.imported, report.read, report.skipped
            );
        }
        Commands::Maintenance { command } => match command {
            MaintenanceCommands::RegenerateTags => {
                let count = manager.regenerate_tags().await?;
                println!("Regenerated tags for {} articles", count);
            }
            MaintenanceCommands::UpdateIds => {
                let report = manager.update_ids().await?;
                println!(
                    "Checked {} articles, moved {}, removed {} stale ids",
                    report.checked, report.resaved, report.deleted
                );
            }
        },
        Commands::Keywords { command } => match command {
            KeywordCommands::Verify => {
                let problems = manager.verify_keyword_files();
                println!("Checked {} keyword files", manager.keyword_files().len());
                for (file, errors) in &problems {
                    for e in errors {
                        println!("{} record {}: {}\n    {}", file, e.index, e.reason, e.record);
                    }
                }
                if !problems.is_empty() {
                    bail!("{} keyword files have malformed records", problems.len());
                }
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!(error = %e, "command failed");
        return Err(e);
    }
    Ok(())
}
