//! DOQL query builder

use std::fmt;

use crate::record::RecordKind;

/// Column joining every detail query to its device
pub const DEFAULT_FOREIGN_KEY: &str = "device_fk";

/// DOQL query builder
///
/// DOQL is read-only SQL over the CMDB views; the builder only assembles
/// the text, the data source interprets it.
#[derive(Debug, Clone)]
pub struct Query {
    /// SELECT clause
    select: Vec<String>,
    /// FROM clause
    from: String,
    /// LEFT JOIN clauses
    joins: Vec<String>,
    /// WHERE clauses
    where_clauses: Vec<String>,
    /// ORDER BY clause
    order_by: Vec<String>,
}

impl Query {
    /// Create a new query for a view
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            select: vec!["*".to_string()],
            from: view.into(),
            joins: Vec::new(),
            where_clauses: Vec::new(),
            order_by: Vec::new(),
        }
    }

    /// Select specific columns
    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Add a LEFT JOIN
    #[must_use]
    pub fn left_join(mut self, view: &str, on: &str) -> Self {
        self.joins.push(format!("LEFT JOIN {view} ON {on}"));
        self
    }

    /// Add WHERE ... IS NOT NULL
    #[must_use]
    pub fn where_not_null(mut self, column: &str) -> Self {
        self.where_clauses.push(format!("{column} IS NOT NULL"));
        self
    }

    /// Order by column; repeated calls add tie-breakers
    #[must_use]
    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "ASC" } else { "DESC" };
        self.order_by.push(format!("{column} {dir}"));
        self
    }

    /// Build the DOQL string
    #[must_use]
    pub fn build(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select.join(", "), self.from);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }

        if !self.where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clauses.join(" AND "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        sql
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

/// Default query for a record kind
#[must_use]
pub fn default_query(kind: RecordKind) -> Query {
    match kind {
        RecordKind::Device => queries::devices(),
        RecordKind::IpAddress => queries::ip_addresses(),
        RecordKind::MacAddress => queries::mac_addresses(),
        RecordKind::HddDetail => queries::hdd_details(),
        RecordKind::CustomField => queries::custom_fields(),
        RecordKind::ExternalLink => queries::external_links(),
        RecordKind::PurchaseLineItem => queries::purchase_line_items(),
    }
}

/// Predefined queries, one per record kind
pub mod queries {
    use super::Query;

    /// One row per device
    #[must_use]
    pub fn devices() -> Query {
        Query::new("view_device_v2 d")
            .select(&[
                "d.device_pk",
                "d.name",
                "d.serial_no",
                "d.asset_no",
                "d.uuid",
                "d.type",
                "d.virtual_subtype",
                "d.service_level",
                "d.in_service",
                "d.is_it_virtual_host",
                "d.os_name",
                "d.os_version",
                "d.os_architecture",
                "h.name AS hw_model",
                "v.name AS manufacturer",
                "d.cpucount",
                "d.cpucore",
                "d.cpuspeed",
                "d.ram",
                "d.ram_size_type",
                "d.hard_disk_count AS hdd_count",
                "d.hard_disk_size AS hdd_size",
                "d.hard_disk_size_type AS hdd_size_type",
                "r.name AS rack",
                "c.name AS customer",
                "d.tags",
                "d.aliases",
                "d.notes",
            ])
            .left_join("view_hardware_v2 h", "h.hardware_pk = d.hardware_fk")
            .left_join("view_vendor_v1 v", "v.vendor_pk = h.vendor_fk")
            .left_join("view_rack_v1 r", "r.rack_pk = d.calculated_rack_fk")
            .left_join("view_customer_v1 c", "c.customer_pk = d.customer_fk")
            .order_by("d.device_pk", true)
    }

    /// IP addresses assigned to devices
    #[must_use]
    pub fn ip_addresses() -> Query {
        Query::new("view_ipaddress_v1 ip")
            .select(&[
                "ip.device_fk",
                "ip.ip_address",
                "ip.label",
                "ip.type AS ip_type",
                "s.name AS subnet",
                "np.hwaddress AS mac_address",
            ])
            .left_join("view_subnet_v1 s", "s.subnet_pk = ip.subnet_fk")
            .left_join("view_netport_v1 np", "np.netport_pk = ip.netport_fk")
            .where_not_null("ip.device_fk")
            .order_by("ip.device_fk", true)
            .order_by("ip.ipaddress_pk", true)
    }

    /// Network ports with hardware addresses
    #[must_use]
    pub fn mac_addresses() -> Query {
        Query::new("view_netport_v1 np")
            .select(&["np.device_fk", "np.hwaddress", "np.port AS port_name", "np.vlan"])
            .where_not_null("np.device_fk")
            .where_not_null("np.hwaddress")
            .order_by("np.device_fk", true)
            .order_by("np.netport_pk", true)
    }

    /// Disk groups installed in devices
    #[must_use]
    pub fn hdd_details() -> Query {
        Query::new("view_hdd_details_v1 hd")
            .select(&[
                "hd.device_fk",
                "hd.hdd_count",
                "hd.raid_type",
                "hd.raid_group",
                "hd.description",
                "h.bytes AS hdd_size",
                "h.size_type AS hdd_size_type",
                "h.rpm",
                "h.type AS hdd_type",
                "v.name AS manufacturer",
            ])
            .left_join("view_hdd_v1 h", "h.hdd_pk = hd.hdd_fk")
            .left_join("view_vendor_v1 v", "v.vendor_pk = h.vendor_fk")
            .order_by("hd.device_fk", true)
            .order_by("hd.hdd_details_pk", true)
    }

    /// Custom field values of devices
    #[must_use]
    pub fn custom_fields() -> Query {
        Query::new("view_device_custom_fields_v1 cf")
            .select(&["cf.device_fk", "cf.key", "cf.value", "cf.type AS field_type", "cf.notes"])
            .order_by("cf.device_fk", true)
            .order_by("cf.key", true)
    }

    /// External links of devices
    #[must_use]
    pub fn external_links() -> Query {
        Query::new("view_deviceurl_v1 u")
            .select(&["u.device_fk", "u.url", "u.notes"])
            .order_by("u.device_fk", true)
            .order_by("u.deviceurl_pk", true)
    }

    /// Purchase line items covering devices
    #[must_use]
    pub fn purchase_line_items() -> Query {
        Query::new("view_purchaselineitems_to_devices_v1 pd")
            .select(&[
                "pd.device_fk",
                "p.purchase_pk AS purchase_id",
                "p.order_no",
                "v.name AS vendor",
                "li.line_type",
                "li.line_contract_type",
                "li.line_quantity",
                "li.line_cost",
                "li.line_start_date",
                "li.line_end_date",
                "li.line_renew_date",
                "li.line_notes AS notes",
            ])
            .left_join(
                "view_purchaselineitem_v1 li",
                "li.purchaselineitem_pk = pd.purchaselineitem_fk",
            )
            .left_join("view_purchase_v1 p", "p.purchase_pk = li.purchase_fk")
            .left_join("view_vendor_v1 v", "v.vendor_pk = p.vendor_fk")
            .order_by("pd.device_fk", true)
            .order_by("li.purchaselineitem_pk", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let query = Query::new("view_device_v2")
            .select(&["device_pk", "name"])
            .where_not_null("name")
            .order_by("device_pk", true);

        assert_eq!(
            query.build(),
            "SELECT device_pk, name FROM view_device_v2 WHERE name IS NOT NULL ORDER BY device_pk ASC"
        );
        assert_eq!(query.to_string(), query.build());
    }

    #[test]
    fn test_joins_precede_where() {
        let sql = Query::new("view_ipaddress_v1 ip")
            .left_join("view_subnet_v1 s", "s.subnet_pk = ip.subnet_fk")
            .where_not_null("ip.device_fk")
            .build();

        let join = sql.find("LEFT JOIN").unwrap();
        let filter = sql.find("WHERE").unwrap();
        assert!(join < filter);
        assert!(sql.ends_with("WHERE ip.device_fk IS NOT NULL"));
    }

    #[test]
    fn test_order_by_tie_breakers() {
        let sql = Query::new("view_netport_v1")
            .order_by("device_fk", true)
            .order_by("netport_pk", false)
            .build();
        assert!(sql.ends_with("ORDER BY device_fk ASC, netport_pk DESC"));
    }

    #[test]
    fn test_every_detail_query_selects_foreign_key() {
        for kind in RecordKind::DETAILS {
            let sql = default_query(kind).build();
            assert!(sql.contains(&format!(".{DEFAULT_FOREIGN_KEY}")), "{kind}: {sql}");
        }
        assert!(default_query(RecordKind::Device).build().contains("device_pk"));
    }
}
