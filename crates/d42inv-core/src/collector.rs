//! High-level inventory collection API

use std::sync::Arc;
use std::time::Duration;

use futures::future::{try_join, try_join_all};
use tracing::{debug, info, instrument};

use crate::aggregate::{Aggregator, DetailSet};
use crate::error::{InventoryError, MalformedPolicy};
use crate::record::{FlatRecord, RecordKind};
use crate::source::{FetchPlan, RecordSource};
use crate::types::InventoryResult;

/// Fully materialized record sets
#[derive(Debug, Clone)]
pub struct FetchedSets {
    /// Device rows
    pub primary: Vec<FlatRecord>,
    /// Detail sets in plan order
    pub details: Vec<DetailSet>,
}

/// Inventory collector
///
/// Fetches every record set of a plan concurrently, then aggregates. The
/// join only starts once all sets are complete; any fetch failure or the
/// timeout abandons the whole run.
pub struct InventoryCollector {
    source: Arc<dyn RecordSource>,
    timeout: Duration,
    aggregator: Aggregator,
}

impl InventoryCollector {
    /// Create a new inventory collector
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self {
            source,
            timeout: Duration::from_secs(60),
            aggregator: Aggregator::new(),
        }
    }

    /// Set the fetch phase timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the malformed-row policy of the aggregation
    #[must_use]
    pub fn with_policy(mut self, policy: MalformedPolicy) -> Self {
        self.aggregator = self.aggregator.with_policy(policy);
        self
    }

    /// Fetch every set of the plan
    ///
    /// # Errors
    /// Returns the first fetch error, or `Timeout` if the whole phase takes
    /// longer than the configured timeout.
    #[instrument(skip_all, fields(details = plan.details.len()))]
    pub async fn fetch(&self, plan: &FetchPlan) -> Result<FetchedSets, InventoryError> {
        debug!("fetching record sets");

        let primary = self.source.fetch(RecordKind::Device, &plan.primary);
        let details = try_join_all(plan.details.iter().map(|(kind, detail)| async move {
            let rows = self.source.fetch(*kind, &detail.query).await?;
            debug!(kind = %kind, rows = rows.len(), "detail set fetched");
            Ok::<_, InventoryError>(DetailSet::new(*kind, rows, detail.foreign_key.clone()))
        }));

        let (primary, details) = tokio::time::timeout(self.timeout, try_join(primary, details))
            .await
            .map_err(|_| InventoryError::Timeout(self.timeout))??;

        info!(devices = primary.len(), sets = details.len(), "record sets fetched");
        Ok(FetchedSets { primary, details })
    }

    /// Fetch and aggregate
    ///
    /// # Errors
    /// Returns an error if any fetch fails, the fetch phase times out, or a
    /// strict aggregation meets a malformed device row.
    #[instrument(skip_all)]
    pub async fn collect(&self, plan: &FetchPlan) -> Result<InventoryResult, InventoryError> {
        let sets = self.fetch(plan).await?;
        self.aggregator.aggregate(&sets.primary, &sets.details)
    }
}
