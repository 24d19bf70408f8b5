//! CQL Runner
//!
//! Runs a statement against a keyspace through the pooled executor, using
//! `CASSANDRA_*` environment variables for the cluster configuration.
//! Rows are printed as JSON.

use cassandra_pool::{EnvConfigSource, ExecutorRegistry, ScyllaConnector};
use clap::{Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, env_required};
use eyre::Result;
use std::sync::Arc;
use tracing::info;

mod values;

#[derive(Parser)]
#[command(name = "cql-runner")]
#[command(about = "Run CQL statements through a pooled keyspace executor")]
struct Cli {
    /// Keyspace to run against. Defaults to CASSANDRA_KEYSPACE.
    #[arg(short, long, global = true)]
    keyspace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a statement and print the returned rows
    Query {
        statement: String,

        /// Bound parameters as `type:value` (text, int, bigint, smallint,
        /// tinyint, boolean, double, float). Untyped values are text.
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Run a statement without reading rows
    Execute {
        statement: String,

        /// Bound parameters, as for `query`
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Check the keyspace answers and print pool statistics
    Health {
        /// Fail when more connections than this are open
        #[arg(long)]
        max_connections: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment);

    // Initialize metrics
    observability::init_metrics();

    let cli = Cli::parse();
    let keyspace = match cli.keyspace {
        Some(keyspace) => keyspace,
        None => env_required("CASSANDRA_KEYSPACE")?,
    };

    let registry = ExecutorRegistry::new(Arc::new(EnvConfigSource::new()), Arc::new(ScyllaConnector::new()));
    let executor = registry.get(&keyspace);

    match cli.command {
        Commands::Query { statement, params } => {
            let params = values::parse_params(&params)?;
            let rows = executor.query(&statement, &params).await?;
            info!("Query returned {} rows", rows.len());
            println!("{}", serde_json::to_string_pretty(&values::rows_to_json(&rows))?);
        }

        Commands::Execute { statement, params } => {
            let params = values::parse_params(&params)?;
            executor.execute(&statement, &params).await?;
            info!("Statement executed");
        }

        Commands::Health { max_connections } => {
            let status = executor.health_check().await;
            let hosts: Vec<serde_json::Value> = executor
                .host_stats()
                .await
                .into_iter()
                .map(|stats| {
                    serde_json::json!({
                        "host": stats.host,
                        "established": stats.established,
                        "unestablished": stats.unestablished,
                        "capacity": stats.capacity,
                    })
                })
                .collect();

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "keyspace": keyspace,
                    "healthy": status.healthy,
                    "message": status.message,
                    "response_time_ms": status.response_time_ms,
                    "version": status.version,
                    "connections": executor.pool_size().await,
                    "hosts": hosts,
                }))?
            );

            if let Some(max) = max_connections {
                executor.check_max_connections(max).await?;
            }
            if !status.healthy {
                eyre::bail!("Keyspace '{}' is unhealthy", keyspace);
            }
        }
    }

    registry.shutdown_all().await;
    Ok(())
}
