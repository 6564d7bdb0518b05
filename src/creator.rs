//! Per-table writer creators and the identity-keyed creator cache.
//!
//! A [`WriterCreator`] is the lazily built bundle of everything needed
//! to open buckets for one table: the bucket-assigning function, the
//! bucket factory, an optional row comparator, and the resolved table
//! root location. Bundles are built once per distinct
//! [`TableSchemaIdentity`] and shared read-only by every bucket created
//! under that identity.

use std::cmp::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::bucket::{assemble_bucket_path, Bucket, BucketFactory};
use crate::context::BucketContext;
use crate::error::{BucketError, CreatorError};
use crate::schema::TableSchemaIdentity;

/// Optional ordering over rows, applied by buckets that sort before
/// writing (e.g. primary-keyed tables).
pub type RowComparator<R> = Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>;

/// Computes the bucket id for a row.
///
/// Must be deterministic given identical row content and context. How
/// event time, watermark, or partition columns map to a bucket id is
/// table-specific and owned by the creator, not by the writer.
pub trait BucketAssigner<R>: Send + Sync {
    /// Compute the partition discriminator for a row; `""` routes the
    /// row to the table's unpartitioned root.
    fn bucket_id(&self, row: &R, context: &BucketContext) -> String;
}

impl<R, F> BucketAssigner<R> for F
where
    F: Fn(&R, &BucketContext) -> String + Send + Sync,
{
    fn bucket_id(&self, row: &R, context: &BucketContext) -> String {
        self(row, context)
    }
}

/// Lazily built, cached bundle of per-table writing machinery.
pub struct WriterCreator<R> {
    /// Identity this creator was built for.
    pub identity: Arc<TableSchemaIdentity>,
    /// Bucket-assigning function.
    pub assigner: Arc<dyn BucketAssigner<R>>,
    /// Factory for this table's buckets.
    pub bucket_factory: Arc<dyn BucketFactory<R>>,
    /// Optional row comparator, shared with every created bucket.
    pub comparator: Option<RowComparator<R>>,
    /// Resolved table root location.
    pub location: String,
}

impl<R> std::fmt::Debug for WriterCreator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterCreator")
            .field("identity", &self.identity)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl<R> WriterCreator<R> {
    /// Open a fresh bucket for the given id under this table's root.
    pub fn create_bucket(&self, bucket_id: &str) -> Result<Box<dyn Bucket<R>>, BucketError> {
        let bucket_path = assemble_bucket_path(&self.location, bucket_id);
        self.bucket_factory.create(
            Arc::clone(&self.identity),
            bucket_id,
            &bucket_path,
            self.comparator.clone(),
        )
    }
}

/// Builds a [`WriterCreator`] for a previously unseen identity.
///
/// Construction performs location resolution, comparator construction,
/// and writer-factory setup, and may block on storage; failures are
/// fatal to the triggering call but never cached.
pub trait WriterCreatorFactory<R>: Send + Sync {
    /// Build the creator bundle for an identity.
    fn create(&self, identity: Arc<TableSchemaIdentity>) -> Result<WriterCreator<R>, CreatorError>;
}

/// Identity-keyed cache of writer creators.
///
/// The writer's execution contract is single-threaded, but construction
/// may block on storage-location resolution, so a concurrency-safe map
/// is used anyway.
pub struct CreatorCache<R> {
    factory: Arc<dyn WriterCreatorFactory<R>>,
    cache: DashMap<Arc<TableSchemaIdentity>, Arc<WriterCreator<R>>>,
}

impl<R> CreatorCache<R> {
    /// Create an empty cache backed by the given factory.
    pub fn new(factory: Arc<dyn WriterCreatorFactory<R>>) -> Self {
        Self {
            factory,
            cache: DashMap::new(),
        }
    }

    /// Resolve the creator for an identity, building it on first use.
    ///
    /// A construction failure is returned to the caller and not cached;
    /// the next resolve for the same identity retries from scratch.
    pub fn resolve(
        &self,
        identity: &Arc<TableSchemaIdentity>,
    ) -> Result<Arc<WriterCreator<R>>, CreatorError> {
        if let Some(creator) = self.cache.get(identity) {
            return Ok(Arc::clone(creator.value()));
        }

        debug!(table = %identity.table_id, "Building writer creator");
        let creator = Arc::new(self.factory.create(Arc::clone(identity))?);
        let entry = self
            .cache
            .entry(Arc::clone(identity))
            .or_insert(creator);
        Ok(Arc::clone(entry.value()))
    }

    /// Number of cached creators.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use crate::error::LocationResolutionSnafu;
    use crate::testing::{test_identity, MemoryBucketFactory};

    /// Factory that counts constructions and can be primed to fail.
    struct CountingFactory {
        constructions: AtomicUsize,
        failures_remaining: AtomicUsize,
    }

    impl CountingFactory {
        fn new(failures: usize) -> Self {
            Self {
                constructions: AtomicUsize::new(0),
                failures_remaining: AtomicUsize::new(failures),
            }
        }
    }

    impl WriterCreatorFactory<String> for CountingFactory {
        fn create(
            &self,
            identity: Arc<TableSchemaIdentity>,
        ) -> Result<WriterCreator<String>, CreatorError> {
            self.constructions.fetch_add(1, AtomicOrdering::SeqCst);
            if self
                .failures_remaining
                .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                    n.checked_sub(1)
                })
                .is_ok()
            {
                return LocationResolutionSnafu {
                    table_id: identity.table_id.clone(),
                    message: "resolver unavailable".to_string(),
                }
                .fail();
            }
            Ok(WriterCreator {
                location: identity.location.clone(),
                identity,
                assigner: Arc::new(|_: &String, _: &BucketContext| String::new()),
                bucket_factory: Arc::new(MemoryBucketFactory::new()),
                comparator: None,
            })
        }
    }

    #[test]
    fn test_resolve_builds_once_per_identity() {
        let factory = Arc::new(CountingFactory::new(0));
        let cache = CreatorCache::new(Arc::clone(&factory) as Arc<dyn WriterCreatorFactory<String>>);

        let a = Arc::new(test_identity("orders", "/lake/orders"));
        let b = Arc::new(test_identity("trades", "/lake/trades"));

        cache.resolve(&a).unwrap();
        cache.resolve(&a).unwrap();
        cache.resolve(&b).unwrap();
        cache.resolve(&a).unwrap();

        assert_eq!(factory.constructions.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_resolve_does_not_cache_failures() {
        let factory = Arc::new(CountingFactory::new(1));
        let cache = CreatorCache::new(Arc::clone(&factory) as Arc<dyn WriterCreatorFactory<String>>);

        let identity = Arc::new(test_identity("orders", "/lake/orders"));

        let err = cache.resolve(&identity).unwrap_err();
        assert!(matches!(err, CreatorError::LocationResolution { .. }));
        assert!(cache.is_empty());

        // Next resolve retries construction from scratch and succeeds.
        cache.resolve(&identity).unwrap();
        assert_eq!(factory.constructions.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_equal_identities_share_one_creator() {
        let factory = Arc::new(CountingFactory::new(0));
        let cache = CreatorCache::new(Arc::clone(&factory) as Arc<dyn WriterCreatorFactory<String>>);

        // Distinct Arcs, equal contents.
        let a = Arc::new(test_identity("orders", "/lake/orders"));
        let b = Arc::new(test_identity("orders", "/lake/orders"));

        let first = cache.resolve(&a).unwrap();
        let second = cache.resolve(&b).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructions.load(AtomicOrdering::SeqCst), 1);
    }
}
