//! d42inv-core: CMDB records to orchestration inventory
//!
//! Projects flat query rows into typed records, joins device rows with their
//! detail rows in memory, groups the resulting devices and hands them to an
//! inventory sink.

pub mod aggregate;
pub mod collector;
pub mod error;
pub mod group;
pub mod project;
pub mod query;
pub mod record;
pub mod sink;
pub mod source;
pub mod types;

pub use aggregate::{Aggregator, DetailSet, aggregate};
pub use collector::{FetchedSets, InventoryCollector};
pub use error::{InventoryError, MalformedPolicy};
pub use group::{EmptyPolicy, GroupingEngine, GroupingSpec, Groups, KeyedGroup, group};
pub use record::{DeviceId, FlatRecord, RecordKind};
pub use sink::{AnsibleInventory, InventorySink, register, write_hostfile};
pub use source::{FetchPlan, RecordSource, SourceQuery};
pub use types::{DeviceRecord, InventoryResult};
