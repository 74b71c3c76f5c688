use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use d42inv_core::*;

fn row(pairs: &[(&str, &str)]) -> FlatRecord {
    pairs
        .iter()
        .map(|(k, v)| (*k, Some((*v).to_string())))
        .collect()
}

// Mock implementations
struct MockSource {
    rows: HashMap<RecordKind, Vec<FlatRecord>>,
    fail: Option<RecordKind>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockSource {
    fn new() -> Self {
        let mut rows = HashMap::new();
        rows.insert(
            RecordKind::Device,
            vec![
                row(&[
                    ("device_pk", "1"),
                    ("name", "web-01"),
                    ("service_level", "Production"),
                    ("ram", "8192"),
                    ("ram_size_type", "MB"),
                    ("tags", "linux,web"),
                ]),
                row(&[
                    ("device_pk", "2"),
                    ("name", "db-01"),
                    ("service_level", "Production"),
                    ("tags", "linux,db"),
                ]),
                row(&[("device_pk", "3"), ("name", "spare"), ("service_level", "")]),
            ],
        );
        rows.insert(
            RecordKind::IpAddress,
            vec![
                row(&[("device_fk", "2"), ("ip_address", "10.0.1.5")]),
                row(&[("device_fk", "1"), ("ip_address", "10.0.0.5")]),
                row(&[("device_fk", "1"), ("ip_address", "10.0.0.6")]),
                row(&[("device_fk", "99"), ("ip_address", "10.9.9.9")]),
            ],
        );
        rows.insert(
            RecordKind::CustomField,
            vec![row(&[("device_fk", "3"), ("key", "owner"), ("value", "ops")])],
        );
        rows.insert(
            RecordKind::PurchaseLineItem,
            vec![row(&[
                ("device_fk", "1"),
                ("order_no", "PO-1"),
                ("line_end_date", "2027-03-31"),
            ])],
        );
        Self {
            rows,
            fail: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RecordSource for MockSource {
    async fn fetch(
        &self,
        kind: RecordKind,
        _query: &SourceQuery,
    ) -> Result<Vec<FlatRecord>, InventoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail == Some(kind) {
            return Err(InventoryError::Transport {
                url: "https://cmdb.example/services/data/v1.0/query/".to_string(),
                status: Some(500),
                message: "internal error".to_string(),
            });
        }
        Ok(self.rows.get(&kind).cloned().unwrap_or_default())
    }
}

#[tokio::test]
async fn test_collect_aggregates_all_sets() {
    let source = Arc::new(MockSource::new());
    let collector = InventoryCollector::new(source.clone());

    let result = collector.collect(&FetchPlan::default()).await.unwrap();

    assert_eq!(result.total_count, 3);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1 + RecordKind::DETAILS.len());

    let web = result.get(DeviceId(1)).unwrap();
    assert_eq!(web.ram_gb, Some(8.0));
    assert_eq!(web.ip_addresses.len(), 2);
    assert_eq!(web.primary_ip(), Some("10.0.0.5"));
    assert_eq!(web.purchase_line_items[0].order_no.as_deref(), Some("PO-1"));
    assert!(web.mac_addresses.is_empty());

    let spare = result.get(DeviceId(3)).unwrap();
    assert!(spare.ip_addresses.is_empty());
    assert_eq!(spare.custom_fields.len(), 1);

    assert_eq!(result.stats.details[&RecordKind::IpAddress].orphaned, 1);
}

#[tokio::test]
async fn test_transport_failure_aborts_run() {
    let mut source = MockSource::new();
    source.fail = Some(RecordKind::MacAddress);
    let collector = InventoryCollector::new(Arc::new(source));

    let err = collector.collect(&FetchPlan::default()).await.unwrap_err();
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_timeout_abandons_aggregation() {
    let mut source = MockSource::new();
    source.delay = Duration::from_millis(200);
    let collector =
        InventoryCollector::new(Arc::new(source)).with_timeout(Duration::from_millis(20));

    let err = collector.collect(&FetchPlan::default()).await.unwrap_err();
    assert!(matches!(err, InventoryError::Timeout(_)));
}

#[tokio::test]
async fn test_end_to_end_grouping_and_outputs() {
    let collector = InventoryCollector::new(Arc::new(MockSource::new()));
    let result = collector.collect(&FetchPlan::default()).await.unwrap();

    let groups = group(
        &result,
        GroupingSpec::SingleField {
            field: "service_level".to_string(),
            split_on_comma: false,
            empty_policy: EmptyPolicy::default(),
        },
    );
    assert_eq!(groups.get("production"), Some(&[DeviceId(1), DeviceId(2)][..]));
    assert_eq!(groups.get("none"), Some(&[DeviceId(3)][..]));

    let mut hostfile = Vec::new();
    write_hostfile(&mut hostfile, &groups, &result, "name").unwrap();
    assert_eq!(
        String::from_utf8(hostfile).unwrap(),
        "[production]\nweb-01\ndb-01\n\n[none]\nspare\n\n"
    );

    let tags = group(
        &result,
        GroupingSpec::MultiValueField {
            field: "tags".to_string(),
            fallback: None,
        },
    );
    assert_eq!(tags.names().collect::<Vec<_>>(), vec!["linux", "web", "db"]);

    let mut inventory = AnsibleInventory::new();
    register(&mut inventory, &result, &tags, "name");
    let json = inventory.to_json();
    assert_eq!(json["linux"]["hosts"], serde_json::json!(["web_01", "db_01"]));
    assert_eq!(
        json["_meta"]["hostvars"]["db_01"]["ansible_host"],
        serde_json::json!("10.0.1.5")
    );
}

#[tokio::test]
async fn test_strict_policy_surfaces_malformed_device() {
    let mut source = MockSource::new();
    source
        .rows
        .get_mut(&RecordKind::Device)
        .unwrap()
        .push(row(&[("name", "no-id")]));
    let source = Arc::new(source);

    let lenient = InventoryCollector::new(source.clone())
        .collect(&FetchPlan::default())
        .await
        .unwrap();
    assert_eq!(lenient.stats.malformed_rows, 1);

    let strict = InventoryCollector::new(source)
        .with_policy(MalformedPolicy::Strict)
        .collect(&FetchPlan::default())
        .await;
    assert!(matches!(strict, Err(InventoryError::MalformedRow { .. })));
}

#[test]
fn test_grouping_by_source_column_names() {
    let primary = vec![
        row(&[
            ("device_pk", "1"),
            ("device_name", "web-01"),
            ("customer_name", "Acme"),
        ]),
        row(&[
            ("device_pk", "2"),
            ("device_name", "db-01"),
            ("customer_name", "Acme"),
        ]),
    ];
    let result = aggregate(&primary, &[]);

    let groups = group(
        &result,
        GroupingSpec::SingleField {
            field: "customer_name".to_string(),
            split_on_comma: false,
            empty_policy: EmptyPolicy::default(),
        },
    );
    assert_eq!(groups.names().collect::<Vec<_>>(), vec!["acme"]);

    let mut hostfile = Vec::new();
    write_hostfile(&mut hostfile, &groups, &result, "device_name").unwrap();
    assert_eq!(
        String::from_utf8(hostfile).unwrap(),
        "[acme]\nweb-01\ndb-01\n\n"
    );
}
