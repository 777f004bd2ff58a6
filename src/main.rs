//! # Context Intelligence CLI (`ctxi`)
//!
//! ## Usage
//!
//! ```bash
//! ctxi --config ./config/ctxi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxi serve mcp` | Start the HTTP + MCP tool server |
//! | `ctxi tools list` | List the registered tools and their parameters |
//! | `ctxi call <tool> --param k=v` | Run one tool against the corpus and print JSON |
//! | `ctxi corpus` | Show document counts per source type |
//!
//! ## Examples
//!
//! ```bash
//! ctxi call detect_conflicts --param query="token expiry"
//! ctxi call cluster_documents --param query=auth --param strategy=project_based
//! ctxi call find_similar_documents --param target_query=oauth \
//!     --param comparison_query=login --param 'similarity_metrics=["semantic_similarity"]'
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use context_intel::config::{self, Config};
use context_intel::retrieval::CorpusRetriever;
use context_intel::server;
use context_intel::tools::{ToolContext, ToolInfo, ToolRegistry};
use context_intel::validation::create_validator;

/// Context Intelligence CLI: cross-document analysis of search results.
#[derive(Parser)]
#[command(
    name = "ctxi",
    about = "Context Intelligence: similarity, clustering, citation and conflict analysis over search results",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ctxi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// Inspect the registered tools.
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },

    /// Run a tool once and print its JSON result.
    ///
    /// Values are parsed as JSON when possible (`5`, `true`, `["a","b"]`)
    /// and passed as strings otherwise.
    Call {
        /// Tool name, e.g. `detect_conflicts`.
        tool: String,
        /// Tool parameters as `key=value` pairs.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Show document counts per source type in the configured corpus.
    Corpus,
}

#[derive(Subcommand)]
enum ServeService {
    /// Serve `/tools/*` and the MCP endpoint on `[server].bind`.
    Mcp,
}

#[derive(Subcommand)]
enum ToolsAction {
    /// List all tools with their parameter schemas.
    List,
}

/// Parse a `key=value` pair for `--param` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn params_object(params: Vec<(String, String)>) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = params
        .into_iter()
        .map(|(k, v)| {
            let value = serde_json::from_str(&v).unwrap_or(serde_json::Value::String(v));
            (k, value)
        })
        .collect();
    serde_json::Value::Object(map)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_writer(io::stderr).with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();

    if let Commands::Tools { action: ToolsAction::List } = cli.command {
        let tools: Vec<ToolInfo> = ToolRegistry::with_builtins()
            .tools()
            .iter()
            .map(|t| ToolInfo::of(t.as_ref()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { service } => match service {
            ServeService::Mcp => server::run_server(&cfg).await?,
        },
        Commands::Call { tool, params } => {
            let result = call_tool(&cfg, &tool, params_object(params)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Corpus => {
            let retriever = CorpusRetriever::load(&cfg.corpus)?;
            println!("{} documents in {}", retriever.len(), cfg.corpus.root.display());
            for (source, count) in retriever.source_counts() {
                println!("  {:<16} {}", source, count);
            }
        }
        Commands::Tools { .. } => {}
    }

    Ok(())
}

async fn call_tool(cfg: &Config, tool: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let retriever = CorpusRetriever::load(&cfg.corpus)?;
    let ctx = ToolContext::new(Arc::new(cfg.clone()), Arc::new(retriever))
        .with_validator(create_validator(&cfg.llm)?);
    ToolRegistry::with_builtins().call(tool, params, &ctx).await
}
