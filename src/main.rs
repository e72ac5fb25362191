// Main entry point for the connhub CLI
// This provides an interactive shell over a demo connection: queries stream in
// the background, can be cancelled, and the catalog can be refreshed and exported.

use anyhow::{anyhow, Context, Result};
use clap::Parser as ClapParser;
use connhub::catalog::CatalogLoader;
use connhub::connection::ConnectionDetails;
use connhub::connectors::demo::DemoConnectionDetails;
use connhub::query::describe_query;
use connhub::{
    CancelToken, ConnectionId, ConnectionRegistry, EngineConfig, QueryExecutionArgs, QueryExecutor, QueryHandle,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// connhub - connection and query lifecycle shell
#[derive(ClapParser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Execute a single SQL query and exit
    #[arg(short, long)]
    execute: Option<String>,

    /// Number of batches the demo connection returns per query
    #[arg(long)]
    batches: Option<usize>,

    /// Rows per demo batch
    #[arg(long)]
    rows: Option<usize>,

    /// Delay between demo batches in milliseconds
    #[arg(long)]
    batch_delay_ms: Option<u64>,

    /// Concurrent catalog updates per connection
    #[arg(long)]
    catalog_concurrency: Option<usize>,

    /// Seconds between automatic catalog refreshes
    #[arg(long)]
    refresh_secs: Option<u64>,
}

impl Args {
    /// Load the configuration file and apply the command line overrides
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(batches) = self.batches {
            config.demo.result_batches = batches;
        }
        if let Some(rows) = self.rows {
            config.demo.rows_per_batch = rows;
        }
        if let Some(delay) = self.batch_delay_ms {
            config.demo.time_between_batches_ms = delay;
        }
        if let Some(limit) = self.catalog_concurrency {
            config.catalog.max_concurrent_updates = limit;
        }
        if let Some(secs) = self.refresh_secs {
            config.catalog.refresh_interval_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Everything the shell works with
struct Shell {
    registry: Arc<ConnectionRegistry>,
    executor: Arc<QueryExecutor>,
    loader: Arc<CatalogLoader>,
    connection_id: ConnectionId,
    /// Queries started with .query
    background: HashMap<u32, QueryHandle>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.engine_config()?;

    let registry = Arc::new(ConnectionRegistry::new());
    let executor = Arc::new(QueryExecutor::new(Arc::clone(&registry), &config.query));
    let loader = Arc::new(CatalogLoader::new(
        Arc::clone(&registry),
        Arc::clone(&executor),
        config.catalog.clone(),
    ));
    let connection = registry.create_connection(ConnectionDetails::Demo(DemoConnectionDetails::new(
        config.demo.clone(),
    )));

    let mut shell = Shell {
        registry,
        executor,
        loader,
        connection_id: connection.connection_id,
        background: HashMap::new(),
    };

    // If a query was provided, execute it and exit
    if let Some(sql) = args.execute {
        return shell.run_query(&sql).await;
    }

    let shutdown = CancelToken::new();
    let refresher = tokio::spawn(Arc::clone(&shell.loader).run_periodic(shutdown.clone()));

    // Interactive REPL (Read-Eval-Print Loop)
    println!("╔════════════════════════════════════════════╗");
    println!("║          connhub Interactive Shell         ║");
    println!("║   Connection and query lifecycle console   ║");
    println!("╚════════════════════════════════════════════╝");
    println!();
    println!("Connected to demo connection {}", shell.connection_id);
    println!("Type SQL queries or '.help' for help");
    println!("Type '.exit' to quit");
    println!();

    let result = shell.repl().await;
    shutdown.cancel();
    let _ = refresher.await;
    result
}

impl Shell {
    async fn repl(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            // Print prompt
            stdout.write_all(b"connhub> ").await?;
            stdout.flush().await?;

            // Read user input
            let Some(input) = lines.next_line().await? else {
                break;
            };
            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            // Handle special commands (starting with .)
            if input.starts_with('.') {
                let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
                let outcome = match command {
                    ".exit" | ".quit" => {
                        println!("Goodbye!");
                        break;
                    }
                    ".help" => {
                        print_help();
                        Ok(())
                    }
                    ".query" => self.start_query(rest.trim()),
                    ".wait" => self.wait_query(rest.trim()).await,
                    ".cancel" => self.cancel_query(rest.trim()),
                    ".retry" => self.retry_query(rest.trim()).await,
                    ".catalog" => self.refresh_catalog().await,
                    ".export-catalog" => self.export_catalog(rest.trim()),
                    ".status" => self.print_status(),
                    ".metrics" => self.print_metrics(),
                    ".history" => self.print_history(),
                    ".reset" => self.reset().await,
                    _ => {
                        println!("Unknown command: {}", command);
                        println!("Type '.help' for help");
                        Ok(())
                    }
                };
                if let Err(e) = outcome {
                    eprintln!("Error: {}", e);
                }
                continue;
            }

            // Execute the SQL query and wait for it
            if let Err(e) = self.run_query(input).await {
                eprintln!("Error: {}", e);
            }
        }

        Ok(())
    }

    fn submit(&self, sql: &str) -> Result<QueryHandle> {
        check_syntax(sql);
        let handle = self
            .executor
            .execute(self.connection_id, QueryExecutionArgs::new(sql))?;
        Ok(handle)
    }

    /// Run a query in the foreground
    async fn run_query(&self, sql: &str) -> Result<()> {
        let handle = self.submit(sql)?;
        let result = handle.wait().await?;
        println!("{}", result.format());
        Ok(())
    }

    /// Run a query in the background
    fn start_query(&mut self, sql: &str) -> Result<()> {
        if sql.is_empty() {
            return Err(anyhow!("usage: .query <sql>"));
        }
        let handle = self.submit(sql)?;
        println!("Query {} started", handle.query_id);
        self.background.insert(handle.query_id, handle);
        Ok(())
    }

    async fn wait_query(&mut self, id: &str) -> Result<()> {
        let query_id = parse_id(id)?;
        let handle = self
            .background
            .remove(&query_id)
            .ok_or_else(|| anyhow!("no background query {}", query_id))?;
        let result = handle.wait().await?;
        println!("{}", result.format());
        Ok(())
    }

    fn cancel_query(&self, id: &str) -> Result<()> {
        let query_id = parse_id(id)?;
        if self.executor.cancel(self.connection_id, query_id) {
            println!("Query {} cancelled", query_id);
        } else {
            println!("Query {} is not running", query_id);
        }
        Ok(())
    }

    async fn retry_query(&self, id: &str) -> Result<()> {
        let query_id = parse_id(id)?;
        let handle = self.executor.retry(self.connection_id, query_id)?;
        let result = handle.wait().await?;
        println!("{}", result.format());
        Ok(())
    }

    async fn refresh_catalog(&self) -> Result<()> {
        let task_id = self.loader.update_catalog(self.connection_id).await?;
        let state = self.connection()?;
        println!("Catalog update {} finished", task_id);
        println!("{}", state.catalog.format());
        Ok(())
    }

    fn export_catalog(&self, path: &str) -> Result<()> {
        let json = self.connection()?.catalog.snapshot().to_json()?;
        if path.is_empty() {
            println!("{}", json);
        } else {
            std::fs::write(path, json).with_context(|| format!("failed to write {}", path))?;
            println!("Catalog written to {}", path);
        }
        Ok(())
    }

    fn print_status(&self) -> Result<()> {
        let state = self.connection()?;
        println!("Connection:  {} ({})", state.connection_id, state.connector_info.display_name);
        println!("Status:      {:?}", state.connection_status);
        println!("Health:      {:?}", state.connection_health);
        println!("Running:     {} queries, {} catalog updates", state.queries_running.len(), state.catalog_updates_running.len());
        println!("Catalog:     {} tables (version {})", state.catalog.table_count(), state.catalog.version());
        for query in state.queries_running.values() {
            println!("  {}", describe_query(query));
        }
        Ok(())
    }

    fn print_metrics(&self) -> Result<()> {
        print!("{}", self.connection()?.metrics.format());
        Ok(())
    }

    fn print_history(&self) -> Result<()> {
        let state = self.connection()?;
        if state.queries_finished.is_empty() {
            println!("No finished queries");
        }
        for query in state.queries_finished.values() {
            println!("{}", describe_query(query));
        }
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        self.registry
            .reset(self.connection_id)
            .await
            .ok_or_else(|| anyhow!("connection {} is gone", self.connection_id))?;
        self.background.clear();
        println!("Connection {} reset", self.connection_id);
        Ok(())
    }

    fn connection(&self) -> Result<Arc<connhub::ConnectionState>> {
        self.registry
            .get(self.connection_id)
            .ok_or_else(|| anyhow!("connection {} is gone", self.connection_id))
    }
}

/// Warn about SQL the generic dialect cannot parse. The backend has the final say.
fn check_syntax(sql: &str) {
    if let Err(e) = SqlParser::parse_sql(&GenericDialect {}, sql) {
        tracing::warn!(error = %e, "Query does not parse as generic SQL");
    }
}

fn parse_id(text: &str) -> Result<u32> {
    text.parse::<u32>()
        .with_context(|| format!("expected a query id, got '{}'", text))
}

/// Print help information
fn print_help() {
    println!("╔════════════════════════════════════════════╗");
    println!("║               connhub Help                 ║");
    println!("╚════════════════════════════════════════════╝");
    println!();
    println!("Special Commands:");
    println!("  .help                   Show this help message");
    println!("  .exit, .quit            Exit the shell");
    println!("  .query <sql>            Run a query in the background");
    println!("  .wait <id>              Wait for a background query and print it");
    println!("  .cancel <id>            Cancel a running query");
    println!("  .retry <id>             Run a finished query again");
    println!("  .catalog                Refresh and print the catalog");
    println!("  .export-catalog [file]  Write the catalog snapshot as JSON");
    println!("  .status                 Show connection status and running work");
    println!("  .metrics                Show per-outcome query metrics");
    println!("  .history                List finished queries");
    println!("  .reset                  Cancel everything and reset the connection");
    println!();
    println!("Anything else is sent to the connection as a query and the");
    println!("result is printed once all batches have arrived.");
    println!();
}
