// Example: Catalog refresh
// Run with: cargo run --example catalog_refresh

use std::sync::Arc;

use connhub::catalog::CatalogLoader;
use connhub::config::{CatalogConfig, QueryConfig};
use connhub::connection::ConnectionDetails;
use connhub::connectors::demo::{DemoChannelConfig, DemoConnectionDetails};
use connhub::{CatalogSnapshot, ConnectionRegistry, QueryExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== connhub Catalog Refresh Example ===\n");

    let registry = Arc::new(ConnectionRegistry::new());
    let executor = Arc::new(QueryExecutor::new(Arc::clone(&registry), &QueryConfig::default()));
    let loader = CatalogLoader::new(Arc::clone(&registry), executor, CatalogConfig::default());

    // 1. A demo connection with two schemas
    println!("1. Creating a demo connection with two schemas...");
    let mut config = DemoChannelConfig::default();
    config.catalog.schema_names = vec!["public".to_string(), "sales".to_string()];
    config.catalog.tables_per_schema = 2;
    config.catalog.columns_per_table = 3;
    let state = registry.create_connection(ConnectionDetails::Demo(DemoConnectionDetails::new(config)));
    let connection_id = state.connection_id;
    println!("Connection {} created\n", connection_id);

    // 2. Load the catalog
    println!("2. Refreshing the catalog...");
    let task_id = loader.update_catalog(connection_id).await?;
    let state = registry
        .get(connection_id)
        .ok_or_else(|| anyhow::anyhow!("connection {} is gone", connection_id))?;
    if let Some(task) = state.catalog_update(task_id) {
        println!("Update {} is {:?} with {} tables\n", task_id, task.status, task.tables_loaded);
    }
    println!("{}\n", state.catalog.format());

    // 3. Export the catalog as a flat snapshot
    println!("3. Exporting a snapshot...");
    let snapshot = state.catalog.snapshot();
    println!(
        "{} names, {} databases, {} schemas, {} tables",
        snapshot.names.len(),
        snapshot.databases.len(),
        snapshot.schemas.len(),
        snapshot.tables.len()
    );
    let json = snapshot.to_json()?;

    // 4. Import it into a fresh catalog
    println!("4. Importing the snapshot into another catalog...");
    let imported = CatalogSnapshot::from_json(&json)?;
    let catalog = connhub::Catalog::new();
    catalog.import_snapshot(1, 100, &imported)?;
    println!("Imported {} tables\n", catalog.table_count());

    println!("=== Example completed successfully! ===");
    Ok(())
}
