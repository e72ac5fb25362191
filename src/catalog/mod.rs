// Catalog
// Cached schema metadata of one connection. Metadata is organized in descriptor
// pools: each pool is a replaceable unit that is swapped atomically on refresh,
// so readers see either the old or the new pool, never a partial merge.

pub mod information_schema;
pub mod loader;
pub mod snapshot;
pub mod update;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

pub use loader::CatalogLoader;
pub use snapshot::CatalogSnapshot;

/// Descriptor pool identifier
pub type DescriptorPoolId = u32;

/// A column of a catalog table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTableColumn {
    pub column_name: String,
    pub ordinal_position: Option<u32>,
}

/// A table with its columns in ordinal order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTable {
    pub table_name: String,
    pub columns: Vec<SchemaTableColumn>,
}

/// All tables of one database schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub database_name: String,
    pub schema_name: String,
    pub tables: Vec<SchemaTable>,
}

#[derive(Debug, Clone, Default)]
struct DescriptorPool {
    rank: u32,
    descriptors: Vec<SchemaDescriptor>,
}

#[derive(Debug, Default)]
struct CatalogInner {
    pools: BTreeMap<DescriptorPoolId, DescriptorPool>,
    version: u64,
}

/// Shared handle to the schema cache of a connection
#[derive(Debug, Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an empty pool. Fails if the id is taken.
    pub fn add_descriptor_pool(&self, pool_id: DescriptorPoolId, rank: u32) -> Result<()> {
        let mut inner = self.write();
        if inner.pools.contains_key(&pool_id) {
            return Err(Error::Catalog(format!("descriptor pool {} already exists", pool_id)));
        }
        inner.pools.insert(
            pool_id,
            DescriptorPool {
                rank,
                descriptors: Vec::new(),
            },
        );
        inner.version += 1;
        Ok(())
    }

    /// Drop a pool and everything in it. Returns false if it did not exist.
    pub fn drop_descriptor_pool(&self, pool_id: DescriptorPoolId) -> bool {
        let mut inner = self.write();
        let dropped = inner.pools.remove(&pool_id).is_some();
        if dropped {
            inner.version += 1;
        }
        dropped
    }

    /// Append a schema descriptor to an existing pool
    pub fn add_schema_descriptor(&self, pool_id: DescriptorPoolId, descriptor: SchemaDescriptor) -> Result<()> {
        let mut inner = self.write();
        let pool = inner
            .pools
            .get_mut(&pool_id)
            .ok_or_else(|| Error::Catalog(format!("unknown descriptor pool {}", pool_id)))?;
        pool.descriptors.push(descriptor);
        inner.version += 1;
        Ok(())
    }

    /// Drop the pool and install a new one with these descriptors in one step
    pub fn replace_descriptor_pool(
        &self,
        pool_id: DescriptorPoolId,
        rank: u32,
        descriptors: Vec<SchemaDescriptor>,
    ) {
        let mut inner = self.write();
        inner.pools.insert(pool_id, DescriptorPool { rank, descriptors });
        inner.version += 1;
    }

    /// Remove every pool
    pub fn clear(&self) {
        let mut inner = self.write();
        if !inner.pools.is_empty() {
            inner.pools.clear();
            inner.version += 1;
        }
    }

    /// Incremented on every modification
    pub fn version(&self) -> u64 {
        self.read().version
    }

    pub fn is_empty(&self) -> bool {
        self.read().pools.values().all(|pool| pool.descriptors.is_empty())
    }

    /// All descriptors, pools ordered by rank and then id
    pub fn descriptors(&self) -> Vec<SchemaDescriptor> {
        let inner = self.read();
        let mut pools: Vec<(&DescriptorPoolId, &DescriptorPool)> = inner.pools.iter().collect();
        pools.sort_by_key(|(id, pool)| (pool.rank, **id));
        pools
            .into_iter()
            .flat_map(|(_, pool)| pool.descriptors.iter().cloned())
            .collect()
    }

    pub fn table_count(&self) -> usize {
        self.read()
            .pools
            .values()
            .flat_map(|pool| pool.descriptors.iter())
            .map(|d| d.tables.len())
            .sum()
    }

    /// Export the flattened representation of the whole catalog
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot::from_descriptors(&self.descriptors())
    }

    /// Import a snapshot into a pool, replacing what the pool held before
    pub fn import_snapshot(&self, pool_id: DescriptorPoolId, rank: u32, snapshot: &CatalogSnapshot) -> Result<()> {
        let descriptors = snapshot.to_descriptors()?;
        self.replace_descriptor_pool(pool_id, rank, descriptors);
        Ok(())
    }

    /// Render the catalog as an indented tree for the shell
    pub fn format(&self) -> String {
        let descriptors = self.descriptors();
        if descriptors.is_empty() {
            return "Catalog is empty".to_string();
        }
        let mut out = String::new();
        for descriptor in &descriptors {
            out.push_str(&format!("{}.{}\n", descriptor.database_name, descriptor.schema_name));
            for table in &descriptor.tables {
                let columns: Vec<&str> = table.columns.iter().map(|c| c.column_name.as_str()).collect();
                out.push_str(&format!("  {} ({})\n", table.table_name, columns.join(", ")));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(schema: &str, tables: &[(&str, &[&str])]) -> SchemaDescriptor {
        SchemaDescriptor {
            database_name: "db".to_string(),
            schema_name: schema.to_string(),
            tables: tables
                .iter()
                .map(|(name, columns)| SchemaTable {
                    table_name: name.to_string(),
                    columns: columns
                        .iter()
                        .enumerate()
                        .map(|(i, c)| SchemaTableColumn {
                            column_name: c.to_string(),
                            ordinal_position: Some(i as u32 + 1),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_pool_lifecycle() {
        let catalog = Catalog::new();
        catalog.add_descriptor_pool(1, 10).unwrap();
        assert!(catalog.add_descriptor_pool(1, 10).is_err());
        catalog
            .add_schema_descriptor(1, descriptor("public", &[("users", &["id", "name"])]))
            .unwrap();
        assert!(catalog.add_schema_descriptor(2, descriptor("x", &[])).is_err());
        assert_eq!(catalog.table_count(), 1);
        assert!(catalog.drop_descriptor_pool(1));
        assert!(!catalog.drop_descriptor_pool(1));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_replace_is_atomic_swap() {
        let catalog = Catalog::new();
        catalog.replace_descriptor_pool(7, 0, vec![descriptor("old", &[("a", &["x"])])]);
        let before = catalog.version();
        catalog.replace_descriptor_pool(7, 0, vec![descriptor("new", &[("b", &["y"]), ("c", &["z"])])]);
        assert!(catalog.version() > before);
        let descriptors = catalog.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].schema_name, "new");
        assert_eq!(catalog.table_count(), 2);
    }

    #[test]
    fn test_import_then_export_gives_back_the_snapshot() {
        let mut other = descriptor("s1", &[("b", &["id", "name"])]);
        other.database_name = "db2".to_string();
        let original = CatalogSnapshot::from_descriptors(&[
            descriptor("s0", &[("a", &["id"])]),
            other,
            descriptor("s0", &[("c", &["id", "created_at"])]),
            descriptor("empty", &[]),
        ]);
        let table_names: Vec<&str> = original.tables.iter().map(|t| original.name(t.name_id).unwrap()).collect();
        assert_eq!(table_names, vec!["a", "b", "c"]);
        assert_eq!(original.databases.len(), 2);
        assert_eq!(original.schemas.len(), 3);

        let catalog = Catalog::new();
        catalog.import_snapshot(1, 100, &original).unwrap();
        let exported = catalog.snapshot();
        assert_eq!(exported, original);

        let wire = CatalogSnapshot::from_json(&exported.to_json().unwrap()).unwrap();
        let reimported = Catalog::new();
        reimported.import_snapshot(1, 100, &wire).unwrap();
        assert_eq!(reimported.snapshot(), original);
    }

    #[test]
    fn test_rejected_import_keeps_the_pool() {
        let catalog = Catalog::new();
        catalog.replace_descriptor_pool(1, 100, vec![descriptor("public", &[("a", &["x"])])]);
        let mut broken = catalog.snapshot();
        broken.tables[0].schema_index = 9;
        assert!(catalog.import_snapshot(1, 100, &broken).is_err());
        assert_eq!(catalog.table_count(), 1);
    }

    #[test]
    fn test_descriptors_ordered_by_rank() {
        let catalog = Catalog::new();
        catalog.replace_descriptor_pool(1, 5, vec![descriptor("late", &[])]);
        catalog.replace_descriptor_pool(2, 1, vec![descriptor("early", &[])]);
        let names: Vec<String> = catalog.descriptors().into_iter().map(|d| d.schema_name).collect();
        assert_eq!(names, vec!["early", "late"]);
    }
}
