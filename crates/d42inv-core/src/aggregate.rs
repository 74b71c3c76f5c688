//! In-memory hash join of device rows and their detail rows
//!
//! The join runs in three phases: index the primary rows by device id, make
//! one pass over every detail set appending projected rows to their owner,
//! then flatten the index into an [`InventoryResult`] in first-seen order.

use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use crate::error::{InventoryError, MalformedPolicy};
use crate::project::{self, ProjectedRecord};
use crate::record::{DeviceId, FlatRecord, RecordKind};
use crate::types::{AggregationStats, DetailStats, DeviceRecord, InventoryResult};

/// Rows of one detail kind together with their join column
#[derive(Debug, Clone)]
pub struct DetailSet {
    /// Kind of the rows; selects the target sub-collection
    pub kind: RecordKind,
    /// Fetched rows
    pub rows: Vec<FlatRecord>,
    /// Column holding the owning device id
    pub foreign_key: String,
}

impl DetailSet {
    /// Create a detail set
    pub fn new(kind: RecordKind, rows: Vec<FlatRecord>, foreign_key: impl Into<String>) -> Self {
        Self {
            kind,
            rows,
            foreign_key: foreign_key.into(),
        }
    }
}

/// Joins primary device rows with detail rows
///
/// Duplicate primary ids are resolved last-write-wins: the later row's
/// attributes replace the earlier ones, the device keeps its first position.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    policy: MalformedPolicy,
}

impl Aggregator {
    /// Create an aggregator that skips malformed primary rows
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the malformed-row policy
    #[must_use]
    pub fn with_policy(mut self, policy: MalformedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Aggregate primary rows and detail sets into nested device records
    ///
    /// # Errors
    /// Only in [`MalformedPolicy::Strict`]: returns `MalformedRow` for the
    /// first primary row without a usable device id. Detail rows are never
    /// fatal.
    #[instrument(skip_all, fields(primary = primary.len(), details = details.len()))]
    pub fn aggregate(
        &self,
        primary: &[FlatRecord],
        details: &[DetailSet],
    ) -> Result<InventoryResult, InventoryError> {
        let mut stats = AggregationStats {
            primary_rows: primary.len(),
            ..AggregationStats::default()
        };

        // Phase 1: index
        let mut devices: Vec<DeviceRecord> = Vec::with_capacity(primary.len());
        let mut index: HashMap<DeviceId, usize> = HashMap::with_capacity(primary.len());

        for (row, raw) in primary.iter().enumerate() {
            let device = match project::project(raw, RecordKind::Device) {
                ProjectedRecord::Device(device) => *device,
                _ => {
                    if self.policy == MalformedPolicy::Strict {
                        return Err(InventoryError::MalformedRow {
                            kind: RecordKind::Device,
                            reason: format!("row {row} has no usable device id"),
                        });
                    }
                    debug!(row, "skipping device row without id");
                    stats.malformed_rows += 1;
                    continue;
                }
            };

            match index.get(&device.device_id) {
                Some(&pos) => {
                    debug!(device = %device.device_id, "duplicate device id, last row wins");
                    stats.duplicate_ids += 1;
                    devices[pos].overwrite_attributes(device);
                }
                None => {
                    index.insert(device.device_id, devices.len());
                    devices.push(device);
                }
            }
        }

        // Phase 2: one pass per detail set
        for set in details {
            let counters = stats.details.entry(set.kind).or_default();
            join_detail(set, &index, &mut devices, counters);
        }

        // Phase 3: flatten
        let result = InventoryResult::new(devices, stats);
        if result.is_empty() && result.stats.malformed_rows > 0 {
            warn!(
                rows = result.stats.malformed_rows,
                "no device row carried a device id; select device_pk in the device query"
            );
        }
        info!(
            devices = result.total_count,
            malformed = result.stats.malformed_rows,
            duplicates = result.stats.duplicate_ids,
            dropped = result.stats.dropped_detail_rows(),
            "aggregation completed"
        );
        Ok(result)
    }
}

/// Aggregate with the recover-locally policy
#[must_use]
pub fn aggregate(primary: &[FlatRecord], details: &[DetailSet]) -> InventoryResult {
    Aggregator::new()
        .aggregate(primary, details)
        .unwrap_or_else(|_| InventoryResult::empty())
}

fn join_detail(
    set: &DetailSet,
    index: &HashMap<DeviceId, usize>,
    devices: &mut [DeviceRecord],
    counters: &mut DetailStats,
) {
    counters.rows += set.rows.len();

    for raw in &set.rows {
        let Some(owner) = project::device_id(raw, &[set.foreign_key.as_str()]) else {
            debug!(kind = %set.kind, key = %set.foreign_key, "detail row without foreign key");
            counters.malformed += 1;
            continue;
        };

        let Some(&pos) = index.get(&owner) else {
            debug!(kind = %set.kind, device = %owner, "orphan detail row");
            counters.orphaned += 1;
            continue;
        };

        attach(&mut devices[pos], project::project(raw, set.kind));
        counters.attached += 1;
    }
}

fn attach(device: &mut DeviceRecord, record: ProjectedRecord) {
    match record {
        ProjectedRecord::IpAddress(r) => device.ip_addresses.push(r),
        ProjectedRecord::MacAddress(r) => device.mac_addresses.push(r),
        ProjectedRecord::HddDetail(r) => device.hdd_details.push(r),
        ProjectedRecord::CustomField(r) => device.custom_fields.push(r),
        ProjectedRecord::ExternalLink(r) => device.external_links.push(r),
        ProjectedRecord::PurchaseLineItem(r) => device.purchase_line_items.push(r),
        ProjectedRecord::Device(_) | ProjectedRecord::UnidentifiedDevice => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> FlatRecord {
        pairs
            .iter()
            .map(|(k, v)| (*k, Some((*v).to_string())))
            .collect()
    }

    fn primary() -> Vec<FlatRecord> {
        vec![
            row(&[("id", "1"), ("name", "h1")]),
            row(&[("id", "2"), ("name", "h2")]),
        ]
    }

    fn ips() -> Vec<FlatRecord> {
        vec![
            row(&[("device_id", "1"), ("ip", "10.0.0.1")]),
            row(&[("device_id", "1"), ("ip", "10.0.0.2")]),
            row(&[("device_id", "3"), ("ip", "10.0.0.9")]),
        ]
    }

    #[test]
    fn test_ip_join_scenario() {
        let details = vec![DetailSet::new(RecordKind::IpAddress, ips(), "device_id")];
        let result = aggregate(&primary(), &details);

        assert_eq!(result.total_count, 2);
        let h1 = result.get(DeviceId(1)).unwrap();
        let ips: Vec<_> = h1.ip_addresses.iter().map(|ip| ip.ip.as_deref()).collect();
        assert_eq!(ips, vec![Some("10.0.0.1"), Some("10.0.0.2")]);
        assert!(result.get(DeviceId(2)).unwrap().ip_addresses.is_empty());
        assert!(result.get(DeviceId(3)).is_none());

        let ip_stats = result.stats.details[&RecordKind::IpAddress];
        assert_eq!(ip_stats.attached, 2);
        assert_eq!(ip_stats.orphaned, 1);
    }

    #[test]
    fn test_orphans_never_surface() {
        let details = vec![DetailSet::new(RecordKind::IpAddress, ips(), "device_id")];
        let result = aggregate(&primary(), &details);

        let all: Vec<_> = result
            .devices()
            .iter()
            .flat_map(|d| d.ip_addresses.iter())
            .filter_map(|ip| ip.ip.as_deref())
            .collect();
        assert!(!all.contains(&"10.0.0.9"));
    }

    #[test]
    fn test_device_count_independent_of_detail_order() {
        let mut reversed = ips();
        reversed.reverse();
        let forward = aggregate(
            &primary(),
            &[DetailSet::new(RecordKind::IpAddress, ips(), "device_id")],
        );
        let backward = aggregate(
            &primary(),
            &[DetailSet::new(RecordKind::IpAddress, reversed, "device_id")],
        );
        assert_eq!(forward.total_count, backward.total_count);
        let ids = |r: &InventoryResult| r.devices().iter().map(|d| d.device_id).collect::<Vec<_>>();
        assert_eq!(ids(&forward), ids(&backward));
    }

    #[test]
    fn test_rerun_is_identical() {
        let details = vec![
            DetailSet::new(RecordKind::IpAddress, ips(), "device_id"),
            DetailSet::new(
                RecordKind::CustomField,
                vec![row(&[("device_id", "2"), ("key", "env"), ("value", "prod")])],
                "device_id",
            ),
        ];
        let first = aggregate(&primary(), &details);
        let second = aggregate(&primary(), &details);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_duplicate_ids_last_write_wins() {
        let primary = vec![
            row(&[("id", "1"), ("name", "first")]),
            row(&[("id", "2"), ("name", "other")]),
            row(&[("id", "1"), ("name", "second")]),
        ];
        let result = aggregate(&primary, &[]);

        assert_eq!(result.total_count, 2);
        assert_eq!(result.devices()[0].device_id, DeviceId(1));
        assert_eq!(result.devices()[0].name.as_deref(), Some("second"));
        assert_eq!(result.stats.duplicate_ids, 1);
    }

    #[test]
    fn test_missing_foreign_key_is_dropped() {
        let details = vec![DetailSet::new(
            RecordKind::MacAddress,
            vec![
                row(&[("mac", "aa:bb:cc:dd:ee:ff")]),
                row(&[("device_id", ""), ("mac", "11:22:33:44:55:66")]),
                row(&[("device_id", "2"), ("mac", "00:00:00:00:00:01")]),
            ],
            "device_id",
        )];
        let result = aggregate(&primary(), &details);

        let mac_stats = result.stats.details[&RecordKind::MacAddress];
        assert_eq!(mac_stats.malformed, 2);
        assert_eq!(mac_stats.attached, 1);
        assert_eq!(result.get(DeviceId(2)).unwrap().mac_addresses.len(), 1);
    }

    #[test]
    fn test_empty_primary() {
        let details = vec![DetailSet::new(RecordKind::IpAddress, ips(), "device_id")];
        let result = aggregate(&[], &details);
        assert!(result.is_empty());
        assert_eq!(result.stats.details[&RecordKind::IpAddress].orphaned, 3);
    }

    #[test]
    fn test_malformed_primary_policy() {
        let primary = vec![row(&[("name", "no-id")]), row(&[("id", "5")])];

        let recovered = aggregate(&primary, &[]);
        assert_eq!(recovered.total_count, 1);
        assert_eq!(recovered.stats.malformed_rows, 1);

        let strict = Aggregator::new()
            .with_policy(MalformedPolicy::Strict)
            .aggregate(&primary, &[]);
        assert!(matches!(
            strict,
            Err(InventoryError::MalformedRow {
                kind: RecordKind::Device,
                ..
            })
        ));
    }

    #[test]
    fn test_rows_without_ids_are_counted() {
        let primary = vec![
            row(&[("name", "web-01"), ("service_level", "Production")]),
            row(&[("name", "db-01"), ("service_level", "Production")]),
        ];
        let result = aggregate(&primary, &[]);

        assert!(result.is_empty());
        assert_eq!(result.stats.primary_rows, 2);
        assert_eq!(result.stats.malformed_rows, 2);
    }

    #[test]
    fn test_inputs_untouched() {
        let primary = primary();
        let details = vec![DetailSet::new(RecordKind::IpAddress, ips(), "device_id")];
        let before = (primary.clone(), details[0].rows.clone());
        let _ = aggregate(&primary, &details);
        assert_eq!(before, (primary, details[0].rows.clone()));
    }
}
