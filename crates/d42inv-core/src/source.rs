//! Data source abstraction and fetch plans

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::InventoryError;
use crate::query::{DEFAULT_FOREIGN_KEY, default_query};
use crate::record::{FlatRecord, RecordKind};

/// Path of the bulk device listing
pub const DEVICES_PATH: &str = "/api/1.0/devices/all/";
/// Array holding the devices in a bulk listing page
pub const DEVICES_ITEMS_KEY: &str = "Devices";

/// Where the rows of one record kind come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceQuery {
    /// DOQL query text
    Doql(String),
    /// Paginated bulk listing
    Bulk {
        /// Endpoint path below the base URL
        path: String,
        /// Name of the array holding the items
        items_key: String,
        /// Page size requested per call
        page_size: usize,
    },
}

impl SourceQuery {
    /// Bulk device listing
    #[must_use]
    pub fn bulk_devices(page_size: usize) -> Self {
        SourceQuery::Bulk {
            path: DEVICES_PATH.to_string(),
            items_key: DEVICES_ITEMS_KEY.to_string(),
            page_size,
        }
    }
}

/// Something that turns a query into flat rows
///
/// Implementations must either return every row or fail; a partial result
/// is never acceptable.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch all rows for a query
    async fn fetch(
        &self,
        kind: RecordKind,
        query: &SourceQuery,
    ) -> Result<Vec<FlatRecord>, InventoryError>;
}

/// One detail set to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailPlan {
    /// Query producing the rows
    pub query: SourceQuery,
    /// Column holding the owning device id
    pub foreign_key: String,
}

/// Queries for the primary set and every detail set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    /// Device query
    pub primary: SourceQuery,
    /// Detail queries by kind
    pub details: BTreeMap<RecordKind, DetailPlan>,
}

impl Default for FetchPlan {
    fn default() -> Self {
        let details = RecordKind::DETAILS
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    DetailPlan {
                        query: SourceQuery::Doql(default_query(kind).build()),
                        foreign_key: DEFAULT_FOREIGN_KEY.to_string(),
                    },
                )
            })
            .collect();
        Self {
            primary: SourceQuery::Doql(default_query(RecordKind::Device).build()),
            details,
        }
    }
}

impl FetchPlan {
    /// Replace the primary query
    #[must_use]
    pub fn with_primary(mut self, primary: SourceQuery) -> Self {
        self.primary = primary;
        self
    }

    /// Add or replace a detail query
    #[must_use]
    pub fn with_detail(
        mut self,
        kind: RecordKind,
        query: SourceQuery,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.details.insert(
            kind,
            DetailPlan {
                query,
                foreign_key: foreign_key.into(),
            },
        );
        self
    }

    /// Drop a detail query
    #[must_use]
    pub fn without(mut self, kind: RecordKind) -> Self {
        self.details.remove(&kind);
        self
    }
}
