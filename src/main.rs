//! Chunkfleet - Main Application
//!
//! Runs one of the fleet's services (storage node, cluster router, global
//! router) or acts as the client that uploads, downloads and deletes files.

use anyhow::{anyhow, bail, Context};
use chunkfleet::api::{self, cluster_router, global_router, node_router};
use chunkfleet::orchestrator::LocalCache;
use chunkfleet::routing::{cluster_deadline, placement_deadline, ClusterApi};
use chunkfleet::storage::NodeApi;
use chunkfleet::transport::{self, HttpCluster, HttpConnector, HttpGlobal, HttpNode};
use chunkfleet::{
    ClusterRouter, Config, Error, GlobalRouter, MetadataStore, Orchestrator, StorageNode,
};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Chunked file placement across clusters of storage nodes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a storage node
    Node(NodeArgs),
    /// Run a cluster router over a fixed set of nodes
    Cluster(ClusterArgs),
    /// Run the global router over named clusters
    Global(GlobalArgs),
    /// Split a file and place its chunks
    Upload {
        path: PathBuf,
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Fetch a placed file and reassemble it
    Download {
        name: String,
        /// Fail unless the result has this SHA-256 digest
        #[arg(long)]
        expect_sha256: Option<String>,
        /// Compare the result byte for byte with this file
        #[arg(long)]
        verify_against: Option<PathBuf>,
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Delete a placed file's chunks and record
    Delete {
        name: String,
        #[command(flatten)]
        client: ClientArgs,
    },
    /// List placed files
    List {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Print a file's placement record
    Show {
        name: String,
        #[command(flatten)]
        client: ClientArgs,
    },
}

#[derive(Args, Debug)]
struct NodeArgs {
    /// Listening host
    #[arg(long, env = "CHUNKFLEET_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Listening port
    #[arg(short, long, env = "CHUNKFLEET_PORT", default_value_t = 5001)]
    port: u16,

    /// Directory holding this node's chunks
    #[arg(long, env = "CHUNKFLEET_NODE_DIR", default_value = "node_storage")]
    dir: PathBuf,

    /// Address other services reach this node at
    #[arg(long, env = "CHUNKFLEET_ADVERTISE")]
    advertise: Option<String>,
}

#[derive(Args, Debug)]
struct ClusterArgs {
    #[arg(long, env = "CHUNKFLEET_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, env = "CHUNKFLEET_PORT", default_value_t = 5000)]
    port: u16,

    /// Member node URL; repeat for each node
    #[arg(long = "node", env = "CHUNKFLEET_NODES", value_delimiter = ',', required = true)]
    nodes: Vec<String>,

    #[command(flatten)]
    routing: RoutingArgs,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    #[arg(long, env = "CHUNKFLEET_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, env = "CHUNKFLEET_PORT", default_value_t = 6000)]
    port: u16,

    /// Cluster as NAME=URL; repeat for each cluster
    #[arg(
        long = "cluster",
        env = "CHUNKFLEET_CLUSTERS",
        value_delimiter = ',',
        value_parser = parse_cluster,
        required = true
    )]
    clusters: Vec<(String, String)>,

    /// Per-call timeout the clusters apply to their nodes, in milliseconds
    #[arg(long, env = "CHUNKFLEET_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,
}

#[derive(Args, Debug)]
struct RoutingArgs {
    /// Score penalty per stored chunk, in bytes
    #[arg(long, env = "CHUNKFLEET_CHUNK_PENALTY", default_value_t = 50 * 1024 * 1024)]
    chunk_penalty: u64,

    /// Scores within this distance of the best are tied
    #[arg(long, env = "CHUNKFLEET_EPSILON", default_value_t = 1e-3)]
    epsilon: f64,

    /// Per-call timeout in milliseconds
    #[arg(long, env = "CHUNKFLEET_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,
}

#[derive(Args, Debug)]
struct ClientArgs {
    /// Global router URL
    #[arg(long, env = "CHUNKFLEET_GLOBAL_URL", default_value = "http://127.0.0.1:6000")]
    global: String,

    /// Directory holding placement records
    #[arg(long, env = "CHUNKFLEET_METADATA_DIR", default_value = "metadata")]
    metadata_dir: PathBuf,

    /// Directory caching downloaded chunks
    #[arg(long, env = "CHUNKFLEET_CHUNK_DIR", default_value = "chunks")]
    chunk_dir: PathBuf,

    /// Directory receiving reconstructed files
    #[arg(long, env = "CHUNKFLEET_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Chunk size in bytes
    #[arg(long, env = "CHUNKFLEET_CHUNK_SIZE", default_value_t = 1024 * 1024)]
    chunk_size: usize,

    /// Chunks uploaded concurrently
    #[arg(long, env = "CHUNKFLEET_PARALLELISM", default_value_t = 1)]
    parallelism: usize,

    /// Per-call timeout in milliseconds
    #[arg(long, env = "CHUNKFLEET_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,
}

fn parse_cluster(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => {
            Ok((name.to_string(), url.to_string()))
        }
        _ => Err(format!("expected NAME=URL, got {value:?}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Node(args) => run_node(args).await,
        Command::Cluster(args) => run_cluster(args).await,
        Command::Global(args) => run_global(args).await,
        Command::Upload { path, client } => {
            let record = orchestrator(&client)?.upload_path(&path).await?;
            println!(
                "uploaded {} ({} bytes) as {} chunks",
                record.file,
                record.size,
                record.chunks.len()
            );
            Ok(())
        }
        Command::Download {
            name,
            expect_sha256,
            verify_against,
            client,
        } => {
            let download = orchestrator(&client)?
                .download(&name, expect_sha256.as_deref())
                .await?;
            if let Some(path) = verify_against {
                let original = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                if original != download.data {
                    bail!("{} differs from {}", download.output.display(), path.display());
                }
                println!("verified against {}", path.display());
            }
            println!(
                "reconstructed {} at {} (sha256 {})",
                download.file,
                download.output.display(),
                download.sha256
            );
            Ok(())
        }
        Command::Delete { name, client } => {
            let report = orchestrator(&client)?.delete(&name).await?;
            println!(
                "deleted {}: {} chunks removed, {} already absent",
                report.file,
                report.deleted.len(),
                report.already_absent.len()
            );
            Ok(())
        }
        Command::List { client } => {
            for file in metadata(&client).list().await? {
                println!("{file}");
            }
            Ok(())
        }
        Command::Show { name, client } => {
            let record = metadata(&client).load(&name).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
    }
}

async fn run_node(args: NodeArgs) -> anyhow::Result<()> {
    let listener = bind(&args.host, args.port).await?;
    let address = match args.advertise {
        Some(address) => address,
        None => format!("http://{}", listener.local_addr()?),
    };
    tokio::fs::create_dir_all(&args.dir)
        .await
        .with_context(|| format!("creating {}", args.dir.display()))?;

    tracing::info!(address = %address, dir = %args.dir.display(), "starting storage node");
    let node = Arc::new(StorageNode::new(address, args.dir));
    api::serve(listener, node_router(node)).await?;
    Ok(())
}

async fn run_cluster(args: ClusterArgs) -> anyhow::Result<()> {
    let config = Config {
        chunk_penalty: args.routing.chunk_penalty,
        epsilon: args.routing.epsilon,
        timeout: Duration::from_millis(args.routing.timeout_ms),
        ..Config::default()
    };
    config.validate()?;

    let client = transport::http::client(config.timeout)?;
    let nodes: Vec<Arc<dyn NodeApi>> = args
        .nodes
        .iter()
        .map(|url| Arc::new(HttpNode::new(url.as_str(), client.clone())) as Arc<dyn NodeApi>)
        .collect();

    let listener = bind(&args.host, args.port).await?;
    let address = format!("http://{}", listener.local_addr()?);
    tracing::info!(nodes = ?args.nodes, "starting cluster router");
    let router = Arc::new(ClusterRouter::new(address, nodes, config.routing()));
    api::serve(listener, cluster_router(router)).await?;
    Ok(())
}

async fn run_global(args: GlobalArgs) -> anyhow::Result<()> {
    if args.timeout_ms == 0 {
        return Err(Error::InvalidArgument("timeout must be greater than 0".into()).into());
    }
    let timeout = Duration::from_millis(args.timeout_ms);
    let client = transport::http::client(cluster_deadline(timeout))?;

    let mut clusters: BTreeMap<String, Arc<dyn ClusterApi>> = BTreeMap::new();
    for (name, url) in args.clusters {
        let cluster: Arc<dyn ClusterApi> = Arc::new(HttpCluster::new(url, client.clone()));
        if clusters.insert(name.clone(), cluster).is_some() {
            bail!("cluster {name} given twice");
        }
    }

    let listener = bind(&args.host, args.port).await?;
    let router = Arc::new(GlobalRouter::new(clusters, timeout));
    api::serve(listener, global_router(router)).await?;
    Ok(())
}

async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .map_err(|e| anyhow!("cannot listen on {host}:{port}: {e}"))
}

fn metadata(args: &ClientArgs) -> MetadataStore {
    MetadataStore::new(&args.metadata_dir)
}

fn orchestrator(args: &ClientArgs) -> anyhow::Result<Orchestrator> {
    let config = Config {
        chunk_size: args.chunk_size,
        timeout: Duration::from_millis(args.timeout_ms),
        parallelism: args.parallelism,
        ..Config::default()
    };
    config.validate()?;

    let placement = transport::http::client(placement_deadline(config.timeout))?;
    let nodes = transport::http::client(config.timeout)?;
    let orchestrator = Orchestrator::new(
        &config,
        Arc::new(HttpGlobal::new(args.global.as_str(), placement)),
        Arc::new(HttpConnector::new(nodes)),
        metadata(args),
        LocalCache::new(&args.chunk_dir, &args.output_dir),
    )?;
    Ok(orchestrator)
}
