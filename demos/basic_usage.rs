// Example: Basic connection and query usage
// Run with: cargo run --example basic_usage

use std::sync::Arc;

use connhub::config::QueryConfig;
use connhub::connection::ConnectionDetails;
use connhub::connectors::demo::{DemoChannelConfig, DemoConnectionDetails};
use connhub::query::describe_query;
use connhub::{ConnectionRegistry, QueryExecutionArgs, QueryExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== connhub Basic Usage Example ===\n");

    // Create a registry and an executor on top of it
    let registry = Arc::new(ConnectionRegistry::new());
    let executor = QueryExecutor::new(Arc::clone(&registry), &QueryConfig::default());

    // 1. Create a demo connection
    println!("1. Creating a demo connection...");
    let mut config = DemoChannelConfig::default();
    config.rows_per_batch = 5;
    let state = registry.create_connection(ConnectionDetails::Demo(DemoConnectionDetails::new(config)));
    let connection_id = state.connection_id;
    println!(
        "Connection {} is {:?} ({:?})\n",
        connection_id, state.connection_status, state.connection_health
    );

    // 2. Run a query and wait for all batches
    println!("2. Running a query...");
    let result = executor
        .execute_and_wait(connection_id, QueryExecutionArgs::new("SELECT * FROM demo"))
        .await?;
    println!("{}\n", result.format());

    // 3. Run a query and follow its progress
    println!("3. Following the progress of a query...");
    let handle = executor.execute(connection_id, QueryExecutionArgs::new("SELECT name FROM demo"))?;
    loop {
        let next = handle.progress.next();
        if let Some(progress) = handle.progress.last() {
            println!(
                "   {} after {} batches",
                progress.status, progress.metrics.total_batches_received
            );
            if progress.status.is_terminal() {
                break;
            }
        }
        if next.wait().await.is_err() {
            break;
        }
    }
    handle.wait().await?;
    println!();

    // 4. Cancel a query
    println!("4. Cancelling a query...");
    let handle = executor.execute(connection_id, QueryExecutionArgs::new("SELECT * FROM demo"))?;
    handle.cancel();
    match handle.wait().await {
        Ok(_) => println!("Query finished before it was cancelled\n"),
        Err(e) => println!("Query ended: {}\n", e),
    }

    // 5. Show the history and the metrics of the connection
    println!("5. Query history...");
    if let Some(state) = registry.get(connection_id) {
        for query in state.queries_finished.values() {
            println!("   {}", describe_query(query));
        }
        println!();
        println!("{}", state.metrics.format());
    }

    println!("=== Example completed successfully! ===");
    Ok(())
}
