//! Ontograph CLI - Browse a resource graph loaded from a seed file
//!
//! Usage:
//!   ontograph --seed graph.toml tree --depth 3
//!   ontograph --seed graph.toml children rack:r1
//!   ontograph --seed graph.toml parents device:d1
//!   ontograph --seed graph.toml search "hall a"
//!   ontograph --seed graph.toml cdc
//!   ontograph --store ./graph.db --seed graph.toml tree
//!
//! Author: hephaex@gmail.com

mod seed;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ontograph::cdc::CdcEvent;
use ontograph::{Ontology, OntologyConfig, Traverser, CHILDREN, PARENTS};
use ontograph_core::{AppConfig, LoggingConfig, Type, ID};
use ontograph_kv::{MemStore, RocksStore, Store};
use ontograph_search::SearchRequest;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::seed::SeedFile;

#[derive(Parser)]
#[command(name = "ontograph")]
#[command(about = "Browse a typed resource graph")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seed file to load (overrides the configured one)
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    /// RocksDB directory to keep the graph in (overrides the configured
    /// one). Without it the graph lives in memory.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resource tree below the root
    Tree {
        /// Maximum depth to descend
        #[arg(long, default_value_t = 8)]
        depth: usize,
    },
    /// List the children of a resource
    Children {
        /// Resource ID as type:key
        id: ID,
    },
    /// List the parents of a resource
    Parents {
        /// Resource ID as type:key
        id: ID,
    },
    /// Search resources by name and searchable fields
    Search {
        term: String,
        /// Restrict to these resource types
        #[arg(long = "type")]
        types: Vec<String>,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the change capture frames produced while loading the seed
    Cdc,
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);
    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging);

    let store: Arc<dyn Store> = match cli.store.as_ref().or(config.ontology.store_path.as_ref()) {
        Some(path) => Arc::new(
            RocksStore::open(path)
                .with_context(|| format!("failed to open store at {}", path.display()))?,
        ),
        None => Arc::new(MemStore::new()),
    };
    let mut ontology =
        Ontology::open(OntologyConfig::from_settings(store, &config.ontology)).await?;

    // Subscribe before loading so the seed itself shows up as changes
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let cdc = ontology.open_cdc(sender);

    if let Some(path) = cli.seed.as_ref().or(config.ontology.seed_file.as_ref()) {
        SeedFile::from_path(path)?.load(&mut ontology).await?;
    }

    match cli.command {
        Commands::Tree { depth } => print_tree(&ontology, depth).await?,
        Commands::Children { id } => print_hop(&ontology, id, CHILDREN).await?,
        Commands::Parents { id } => print_hop(&ontology, id, PARENTS).await?,
        Commands::Search { term, types, limit } => {
            ontology.initialize_search_index().await?;
            let request = SearchRequest::new(term)
                .with_types(types.into_iter().map(Type::from).collect())
                .with_limit(limit.unwrap_or(config.ontology.search_limit));
            for resource in ontology.search(&request).await? {
                println!("{}\t{}", resource.id, resource.name);
            }
        }
        Commands::Cdc => {
            cdc.disconnect();
            while let Ok(frame) = receiver.try_recv() {
                let records = match frame.decode()? {
                    CdcEvent::ResourceSets(resources) => {
                        resources.iter().map(|r| r.id.to_string()).collect()
                    }
                    CdcEvent::ResourceDeletes(ids) => ids.iter().map(ID::to_string).collect(),
                    CdcEvent::RelationshipSets(rels) | CdcEvent::RelationshipDeletes(rels) => {
                        rels.iter().map(ToString::to_string).collect::<Vec<_>>()
                    }
                };
                for record in records {
                    println!("{}\t{}", frame.channel, record);
                }
            }
        }
    }

    ontology.close();
    Ok(())
}

async fn print_hop(ontology: &Ontology, id: ID, traverser: Traverser) -> anyhow::Result<()> {
    ontology
        .new_retrieve()
        .where_ids(vec![id.clone()])
        .entry()
        .exclude_field_data()
        .exec()
        .await
        .with_context(|| format!("resource {id} does not exist"))?;

    let resources = ontology
        .new_retrieve()
        .where_ids(vec![id])
        .traverse_to(traverser)
        .exec_entries()
        .await?;
    for resource in resources {
        println!("{}\t{}", resource.id, resource.name);
    }
    Ok(())
}

async fn print_tree(ontology: &Ontology, max_depth: usize) -> anyhow::Result<()> {
    let mut stack = vec![(ID::root(), 0usize)];
    while let Some((id, depth)) = stack.pop() {
        let resource = ontology.retrieve_resource(&id, None).await?;
        println!("{}{} ({})", "  ".repeat(depth), resource.name, resource.id);
        if depth >= max_depth {
            continue;
        }
        let children = ontology
            .new_retrieve()
            .where_ids(vec![id])
            .traverse_to(CHILDREN)
            .exclude_field_data()
            .exec_entries()
            .await?;
        // Reverse so children print in key order
        stack.extend(children.into_iter().rev().map(|child| (child.id, depth + 1)));
    }
    Ok(())
}
