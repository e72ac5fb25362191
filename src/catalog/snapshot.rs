// Flattened catalog snapshot
// The wire representation of a catalog: flat arrays of databases, schemas and
// tables that reference their parents by index, and a shared dictionary that
// stores every name once. Tables keep the order in which they were added.

use seahash::SeaHasher;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;

use super::{SchemaDescriptor, SchemaTable, SchemaTableColumn};
use crate::error::{Error, Result};

type NameIndex = HashMap<String, u32, BuildHasherDefault<SeaHasher>>;

/// Interns names and hands out stable dictionary ids
#[derive(Default)]
struct NameDictionary {
    names: Vec<String>,
    index: NameIndex,
}

impl NameDictionary {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDatabase {
    pub name_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSchema {
    pub name_id: u32,
    pub database_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name_id: u32,
    #[serde(default)]
    pub ordinal_position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTable {
    pub name_id: u32,
    pub database_index: u32,
    pub schema_index: u32,
    pub columns: Vec<CatalogColumn>,
}

/// Flattened catalog with parent-index links and a shared name dictionary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub names: Vec<String>,
    pub databases: Vec<CatalogDatabase>,
    pub schemas: Vec<CatalogSchema>,
    pub tables: Vec<CatalogTable>,
}

impl CatalogSnapshot {
    /// Flatten descriptors. Descriptors naming the same database and schema share
    /// one schema entry.
    pub fn from_descriptors(descriptors: &[SchemaDescriptor]) -> Self {
        let mut dictionary = NameDictionary::default();
        let mut snapshot = CatalogSnapshot::default();
        let mut database_indices: HashMap<u32, u32> = HashMap::new();
        let mut schema_indices: HashMap<(u32, u32), u32> = HashMap::new();

        for descriptor in descriptors {
            let database_name = dictionary.intern(&descriptor.database_name);
            let database_index = *database_indices.entry(database_name).or_insert_with(|| {
                snapshot.databases.push(CatalogDatabase {
                    name_id: database_name,
                });
                snapshot.databases.len() as u32 - 1
            });

            let schema_name = dictionary.intern(&descriptor.schema_name);
            let schema_index = *schema_indices
                .entry((database_index, schema_name))
                .or_insert_with(|| {
                    snapshot.schemas.push(CatalogSchema {
                        name_id: schema_name,
                        database_index,
                    });
                    snapshot.schemas.len() as u32 - 1
                });

            for table in &descriptor.tables {
                let columns = table
                    .columns
                    .iter()
                    .map(|column| CatalogColumn {
                        name_id: dictionary.intern(&column.column_name),
                        ordinal_position: column.ordinal_position,
                    })
                    .collect();
                snapshot.tables.push(CatalogTable {
                    name_id: dictionary.intern(&table.table_name),
                    database_index,
                    schema_index,
                    columns,
                });
            }
        }
        snapshot.names = dictionary.names;
        snapshot
    }

    /// Look up a dictionary entry
    pub fn name(&self, name_id: u32) -> Option<&str> {
        self.names.get(name_id as usize).map(String::as_str)
    }

    fn resolve(&self, name_id: u32) -> Result<String> {
        self.name(name_id)
            .map(str::to_string)
            .ok_or_else(|| Error::Catalog(format!("name id {} is out of range", name_id)))
    }

    /// Rebuild descriptors in snapshot order.
    ///
    /// Every run of consecutive tables sharing a schema becomes one descriptor,
    /// and a schema without tables becomes an empty descriptor at the point where
    /// the schema is introduced. Flattening the result again yields the same
    /// table order and parent links. Fails on out-of-range indices or name ids,
    /// on databases without schemas, and on duplicate database or schema names,
    /// which would be merged when flattened again.
    pub fn to_descriptors(&self) -> Result<Vec<SchemaDescriptor>> {
        let mut database_names = Vec::with_capacity(self.databases.len());
        let mut seen_databases = HashSet::new();
        for database in &self.databases {
            let name = self.resolve(database.name_id)?;
            if !seen_databases.insert(name.clone()) {
                return Err(Error::Catalog(format!("database '{}' appears twice", name)));
            }
            database_names.push(name);
        }

        let mut schema_names = Vec::with_capacity(self.schemas.len());
        let mut seen_schemas = HashSet::new();
        let mut has_schema = vec![false; self.databases.len()];
        for schema in &self.schemas {
            let database_index = schema.database_index as usize;
            let database_name = database_names
                .get(database_index)
                .ok_or_else(|| Error::Catalog(format!("database index {} is out of range", schema.database_index)))?;
            let name = self.resolve(schema.name_id)?;
            if !seen_schemas.insert((database_index, name.clone())) {
                return Err(Error::Catalog(format!("schema '{}.{}' appears twice", database_name, name)));
            }
            has_schema[database_index] = true;
            schema_names.push((database_index, name));
        }
        if let Some(index) = has_schema.iter().position(|has| !has) {
            return Err(Error::Catalog(format!("database '{}' has no schemas", database_names[index])));
        }

        let descriptor = |schema_index: usize| {
            let (database_index, schema_name) = &schema_names[schema_index];
            SchemaDescriptor {
                database_name: database_names[*database_index].clone(),
                schema_name: schema_name.clone(),
                tables: Vec::new(),
            }
        };

        let mut descriptors: Vec<SchemaDescriptor> = Vec::new();
        let mut introduced = vec![false; self.schemas.len()];
        let mut next_unseen = 0;
        let mut current_schema = None;
        for table in &self.tables {
            let schema_index = table.schema_index as usize;
            let schema = self
                .schemas
                .get(schema_index)
                .ok_or_else(|| Error::Catalog(format!("schema index {} is out of range", table.schema_index)))?;
            if schema.database_index != table.database_index {
                return Err(Error::Catalog(format!(
                    "table links database {} but its schema belongs to database {}",
                    table.database_index, schema.database_index
                )));
            }
            let columns = table
                .columns
                .iter()
                .map(|column| {
                    Ok(SchemaTableColumn {
                        column_name: self.resolve(column.name_id)?,
                        ordinal_position: column.ordinal_position,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let table = SchemaTable {
                table_name: self.resolve(table.name_id)?,
                columns,
            };

            if current_schema != Some(schema_index) {
                // Schemas listed before this one that no table introduced yet
                while next_unseen < schema_index {
                    if !introduced[next_unseen] {
                        introduced[next_unseen] = true;
                        descriptors.push(descriptor(next_unseen));
                    }
                    next_unseen += 1;
                }
                introduced[schema_index] = true;
                descriptors.push(descriptor(schema_index));
                current_schema = Some(schema_index);
            }
            if let Some(last) = descriptors.last_mut() {
                last.tables.push(table);
            }
        }
        for (schema_index, done) in introduced.iter().enumerate() {
            if !done {
                descriptors.push(descriptor(schema_index));
            }
        }
        Ok(descriptors)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: &[&str]) -> SchemaTable {
        SchemaTable {
            table_name: name.to_string(),
            columns: columns
                .iter()
                .enumerate()
                .map(|(i, c)| SchemaTableColumn {
                    column_name: c.to_string(),
                    ordinal_position: Some(i as u32 + 1),
                })
                .collect(),
        }
    }

    #[test]
    fn test_two_tables_with_two_columns() {
        let descriptors = vec![SchemaDescriptor {
            database_name: "demo".into(),
            schema_name: "public".into(),
            tables: vec![table("a", &["x", "y"]), table("b", &["x", "z"])],
        }];
        let snapshot = CatalogSnapshot::from_descriptors(&descriptors);
        assert_eq!(snapshot.tables.len(), 2);
        for t in &snapshot.tables {
            assert_eq!(t.columns.len(), 2);
            assert_eq!(t.database_index, 0);
            assert_eq!(t.schema_index, 0);
        }
        assert_eq!(snapshot.schemas[0].database_index, 0);
        // "x" appears in both tables but is stored once
        assert_eq!(snapshot.names.iter().filter(|n| *n == "x").count(), 1);
    }

    #[test]
    fn test_json_roundtrip_keeps_order_and_links() {
        let descriptors = vec![
            SchemaDescriptor {
                database_name: "db1".into(),
                schema_name: "s1".into(),
                tables: vec![table("t2", &["b", "a"]), table("t1", &["c"])],
            },
            SchemaDescriptor {
                database_name: "db2".into(),
                schema_name: "s1".into(),
                tables: vec![table("t3", &[])],
            },
        ];
        let snapshot = CatalogSnapshot::from_descriptors(&descriptors);
        assert_eq!(snapshot.databases.len(), 2);
        assert_eq!(snapshot.schemas.len(), 2);
        assert_eq!(snapshot.schemas[1].database_index, 1);

        let decoded = CatalogSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.to_descriptors().unwrap(), descriptors);
    }

    #[test]
    fn test_interleaved_tables_keep_their_order() {
        // Names deliberately not in flattening order
        let snapshot = CatalogSnapshot {
            names: ["a", "b", "c", "s0", "s1", "db1", "db2", "id"].map(String::from).to_vec(),
            databases: vec![CatalogDatabase { name_id: 5 }, CatalogDatabase { name_id: 6 }],
            schemas: vec![
                CatalogSchema { name_id: 3, database_index: 0 },
                CatalogSchema { name_id: 4, database_index: 1 },
            ],
            tables: vec![
                CatalogTable { name_id: 0, database_index: 0, schema_index: 0, columns: vec![] },
                CatalogTable {
                    name_id: 1,
                    database_index: 1,
                    schema_index: 1,
                    columns: vec![CatalogColumn { name_id: 7, ordinal_position: Some(1) }],
                },
                CatalogTable { name_id: 2, database_index: 0, schema_index: 0, columns: vec![] },
            ],
        };
        let flattened = CatalogSnapshot::from_descriptors(&snapshot.to_descriptors().unwrap());

        let tables: Vec<(&str, u32, u32)> = flattened
            .tables
            .iter()
            .map(|t| (flattened.name(t.name_id).unwrap(), t.database_index, t.schema_index))
            .collect();
        assert_eq!(tables, vec![("a", 0, 0), ("b", 1, 1), ("c", 0, 0)]);
        assert_eq!(flattened.databases.len(), 2);
        assert_eq!(flattened.schemas[1].database_index, 1);
        assert_eq!(flattened.name(flattened.tables[1].columns[0].name_id), Some("id"));
    }

    #[test]
    fn test_schema_without_tables_is_kept() {
        let descriptors = vec![
            SchemaDescriptor {
                database_name: "db".into(),
                schema_name: "s0".into(),
                tables: vec![table("a", &["x"])],
            },
            SchemaDescriptor {
                database_name: "db".into(),
                schema_name: "empty".into(),
                tables: vec![],
            },
            SchemaDescriptor {
                database_name: "db".into(),
                schema_name: "s2".into(),
                tables: vec![table("b", &["y"])],
            },
        ];
        let snapshot = CatalogSnapshot::from_descriptors(&descriptors);
        assert_eq!(snapshot.to_descriptors().unwrap(), descriptors);
    }

    #[test]
    fn test_database_without_schemas_is_rejected() {
        let mut snapshot = CatalogSnapshot::from_descriptors(&[SchemaDescriptor {
            database_name: "db".into(),
            schema_name: "s".into(),
            tables: vec![table("t", &["c"])],
        }]);
        snapshot.names.push("orphan".into());
        snapshot.databases.push(CatalogDatabase {
            name_id: snapshot.names.len() as u32 - 1,
        });
        assert!(matches!(snapshot.to_descriptors(), Err(Error::Catalog(_))));
    }

    #[test]
    fn test_duplicate_schema_is_rejected() {
        let mut snapshot = CatalogSnapshot::from_descriptors(&[SchemaDescriptor {
            database_name: "db".into(),
            schema_name: "s".into(),
            tables: vec![],
        }]);
        snapshot.schemas.push(snapshot.schemas[0].clone());
        assert!(matches!(snapshot.to_descriptors(), Err(Error::Catalog(_))));
    }

    #[test]
    fn test_invalid_links_are_rejected() {
        let mut snapshot = CatalogSnapshot::from_descriptors(&[SchemaDescriptor {
            database_name: "db".into(),
            schema_name: "s".into(),
            tables: vec![table("t", &["c"])],
        }]);
        snapshot.tables[0].schema_index = 5;
        assert!(matches!(snapshot.to_descriptors(), Err(Error::Catalog(_))));
    }
}
