//! Table identity and bucket keys.
//!
//! A [`TableSchemaIdentity`] is the immutable descriptor that determines
//! bucketing and writing behavior for one logical table. The writer
//! discovers identities at runtime from the extraction strategy and keys
//! its creator cache by them, so equality and hashing cover every field.

use std::fmt;
use std::hash::{Hash, Hasher};

use arrow_schema::SchemaRef;
use serde::{Deserialize, Serialize};

/// Identifier of a logical table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    /// Database (namespace) the table belongs to.
    pub database: String,
    /// Table name within the database.
    pub table: String,
}

impl TableId {
    /// Create a new table id.
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Immutable schema descriptor for one table configuration.
///
/// Created once per distinct table configuration encountered and shared
/// as `Arc<TableSchemaIdentity>` between the creator cache and every
/// bucket opened under it.
#[derive(Debug, Clone)]
pub struct TableSchemaIdentity {
    /// Table identifier.
    pub table_id: TableId,
    /// Ordered typed columns.
    pub schema: SchemaRef,
    /// Table root location (URI or path).
    pub location: String,
    /// Ordered primary-key column names, possibly empty.
    pub primary_keys: Vec<String>,
    /// Ordered partition column names, possibly empty.
    pub partition_columns: Vec<String>,
}

impl PartialEq for TableSchemaIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.table_id == other.table_id
            && self.location == other.location
            && self.primary_keys == other.primary_keys
            && self.partition_columns == other.partition_columns
            && self.schema.as_ref() == other.schema.as_ref()
    }
}

impl Eq for TableSchemaIdentity {}

impl Hash for TableSchemaIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table_id.hash(state);
        self.location.hash(state);
        self.primary_keys.hash(state);
        self.partition_columns.hash(state);
        // Arrow Schema does not implement Hash; fields are hashed by
        // name, type, and nullability, consistent with the Eq impl.
        for field in self.schema.fields() {
            field.name().hash(state);
            format!("{:?}", field.data_type()).hash(state);
            field.is_nullable().hash(state);
        }
    }
}

/// Registry key for one bucket: (table id, bucket id).
///
/// An empty bucket id denotes the table's unpartitioned root location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// Table the bucket belongs to.
    pub table_id: TableId,
    /// Partition discriminator; `""` for the table root.
    pub bucket_id: String,
}

impl BucketKey {
    /// Create a new bucket key.
    pub fn new(table_id: TableId, bucket_id: impl Into<String>) -> Self {
        Self {
            table_id,
            bucket_id: bucket_id.into(),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bucket_id.is_empty() {
            write!(f, "{}", self.table_id)
        } else {
            write!(f, "{}/{}", self.table_id, self.bucket_id)
        }
    }
}
