//! Configuration loading and types

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use d42inv_client::ClientOptions;
use d42inv_core::group::DEFAULT_EMPTY_GROUP;
use d42inv_core::project::parse_bool;
use d42inv_core::source::DEVICES_PATH;
use d42inv_core::{
    EmptyPolicy, FetchPlan, GroupingSpec, KeyedGroup, MalformedPolicy, RecordKind, SourceQuery,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration file name searched in the default locations
pub const CONFIG_FILE: &str = "d42inv.toml";

/// Errors raised while loading or checking the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// Config file
        path: PathBuf,
        /// Underlying TOML error
        source: toml::de::Error,
    },

    /// A required setting has no value
    #[error("missing required setting {0}")]
    Missing(&'static str),

    /// An environment variable holds an unusable value
    #[error("invalid value {value:?} for {name}")]
    InvalidValue {
        /// Variable name
        name: &'static str,
        /// Offending value
        value: String,
    },

    /// Grouping section is inconsistent
    #[error("invalid grouping: {0}")]
    InvalidGrouping(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device42 connection
    #[serde(default)]
    pub d42: D42Config,
    /// Grouping rules
    #[serde(default)]
    pub grouping: GroupingConfig,
    /// DOQL overrides by record kind
    #[serde(default)]
    pub queries: BTreeMap<RecordKind, String>,
    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Where the device set comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSource {
    /// DOQL query against the device view
    #[default]
    Doql,
    /// Paginated bulk device listing
    Api,
}

/// Device42 connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct D42Config {
    /// Base URL, e.g. `https://d42.example.com`
    pub url: Option<String>,
    /// API user
    pub username: Option<String>,
    /// API password
    pub password: Option<String>,
    /// Verify TLS certificates
    #[serde(default = "default_true")]
    pub ssl_check: bool,
    /// Per-request and overall fetch timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Page size for bulk listings
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Source of the device set
    #[serde(default)]
    pub device_source: DeviceSource,
}

impl Default for D42Config {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            ssl_check: true,
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            device_source: DeviceSource::default(),
        }
    }
}

/// Grouping strategy names
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    /// One group per field value
    #[default]
    SingleField,
    /// One group per element of a list field
    MultiValue,
    /// Names composed from keyed expressions
    Keyed,
}

/// What to do with devices lacking a grouping value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyMode {
    /// Leave them out
    Drop,
    /// Put them into `empty_group`
    #[default]
    Bucket,
}

/// Grouping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Strategy
    #[serde(default)]
    pub strategy: GroupingStrategy,
    /// Field for `single_field` and `multi_value`
    pub field: Option<String>,
    /// Split single-field values on commas
    #[serde(default)]
    pub split_on_comma: bool,
    /// Handling of empty values
    #[serde(default)]
    pub empty: EmptyMode,
    /// Bucket for empty values
    #[serde(default = "default_empty_group")]
    pub empty_group: String,
    /// Field naming each host
    #[serde(default = "default_reference_field")]
    pub reference_field: String,
    /// Abort on the first malformed row or missing group field
    #[serde(default)]
    pub strict: bool,
    /// Expressions for the `keyed` strategy
    #[serde(default)]
    pub keyed: Vec<KeyedGroup>,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            strategy: GroupingStrategy::default(),
            field: None,
            split_on_comma: false,
            empty: EmptyMode::default(),
            empty_group: default_empty_group(),
            reference_field: default_reference_field(),
            strict: false,
            keyed: Vec::new(),
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Static hostfile written by `hostfile`
    #[serde(default = "default_hostfile")]
    pub hostfile: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            hostfile: default_hostfile(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    100
}

fn default_empty_group() -> String {
    DEFAULT_EMPTY_GROUP.to_string()
}

fn default_reference_field() -> String {
    "name".to_string()
}

fn default_hostfile() -> PathBuf {
    PathBuf::from("hosts")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration text
    ///
    /// # Errors
    /// Returns the TOML error for invalid input
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a found file cannot be read or parsed
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("D42INV_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let mut paths = vec![
            PathBuf::from(CONFIG_FILE),
            PathBuf::from("/etc/d42inv").join(CONFIG_FILE),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("d42inv").join(CONFIG_FILE));
        }

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        tracing::debug!("no config file found, using defaults and environment");
        Ok(Config::default())
    }

    /// Overlay environment variables read through `lookup`
    ///
    /// # Errors
    /// Returns `InvalidValue` for a boolean variable that does not parse
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &'static str| -> Result<Option<bool>, ConfigError> {
            lookup(name)
                .map(|value| {
                    parse_bool(&value).ok_or(ConfigError::InvalidValue { name, value })
                })
                .transpose()
        };

        if let Some(url) = lookup("D42_URL") {
            self.d42.url = Some(url);
        }
        if let Some(user) = lookup("D42_USER") {
            self.d42.username = Some(user);
        }
        if let Some(password) = lookup("D42_PWD") {
            self.d42.password = Some(password);
        }
        if let Some(check) = flag("D42_SSL_CHECK")? {
            self.d42.ssl_check = check;
        }
        if let Some(skip) = flag("D42_SKIP_SSL_CHECK")? {
            self.d42.ssl_check = !skip;
        }
        if let Some(field) = lookup("GROUP_BY_FIELD") {
            self.grouping.field = Some(field);
        }
        if let Some(field) = lookup("GROUP_BY_REFERENCE_FIELD") {
            self.grouping.reference_field = field;
        }
        if let Some(split) = flag("SPLIT_GROUP_BY_COMMA")? {
            self.grouping.split_on_comma = split;
        }
        if let Some(query) = lookup("GROUP_BY_QUERY") {
            self.queries.insert(RecordKind::Device, query);
        }

        Ok(self)
    }

    /// Check that every required value is present
    ///
    /// # Errors
    /// Returns the first missing or inconsistent setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_connection()?;
        if self.grouping.reference_field.trim().is_empty() {
            return Err(ConfigError::Missing("grouping.reference_field"));
        }
        self.grouping_spec().map(|_| ())
    }

    /// Check only the connection settings
    ///
    /// # Errors
    /// Returns the first missing connection value
    pub fn validate_connection(&self) -> Result<(), ConfigError> {
        if self.d42.url.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("d42.url (D42_URL)"));
        }
        if self.d42.username.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("d42.username (D42_USER)"));
        }
        if self.d42.password.is_none() {
            return Err(ConfigError::Missing("d42.password (D42_PWD)"));
        }
        Ok(())
    }

    /// Build the grouping strategy
    ///
    /// # Errors
    /// Returns error if the chosen strategy lacks its inputs
    pub fn grouping_spec(&self) -> Result<GroupingSpec, ConfigError> {
        let grouping = &self.grouping;
        let field = || {
            grouping
                .field
                .clone()
                .filter(|f| !f.trim().is_empty())
                .ok_or(ConfigError::Missing("grouping.field (GROUP_BY_FIELD)"))
        };

        if grouping.strategy != GroupingStrategy::Keyed
            && grouping.empty == EmptyMode::Bucket
            && grouping.empty_group.trim().is_empty()
        {
            return Err(ConfigError::InvalidGrouping(
                "empty_group must not be blank when empty = \"bucket\"".to_string(),
            ));
        }

        match grouping.strategy {
            GroupingStrategy::SingleField => Ok(GroupingSpec::SingleField {
                field: field()?,
                split_on_comma: grouping.split_on_comma,
                empty_policy: self.empty_policy(),
            }),
            GroupingStrategy::MultiValue => Ok(GroupingSpec::MultiValueField {
                field: field()?,
                fallback: match grouping.empty {
                    EmptyMode::Drop => None,
                    EmptyMode::Bucket => Some(grouping.empty_group.clone()),
                },
            }),
            GroupingStrategy::Keyed if grouping.keyed.is_empty() => Err(
                ConfigError::InvalidGrouping("keyed strategy needs at least one [[grouping.keyed]]".to_string()),
            ),
            GroupingStrategy::Keyed => Ok(GroupingSpec::ComposedKeys(grouping.keyed.clone())),
        }
    }

    fn empty_policy(&self) -> EmptyPolicy {
        match self.grouping.empty {
            EmptyMode::Drop => EmptyPolicy::Drop,
            EmptyMode::Bucket => EmptyPolicy::Bucket(self.grouping.empty_group.clone()),
        }
    }

    /// Malformed-input policy
    #[must_use]
    pub fn policy(&self) -> MalformedPolicy {
        if self.grouping.strict {
            MalformedPolicy::Strict
        } else {
            MalformedPolicy::Recover
        }
    }

    /// Build the fetch plan from the source choice and query overrides
    #[must_use]
    pub fn fetch_plan(&self) -> FetchPlan {
        let mut plan = FetchPlan::default();

        for (kind, query) in &self.queries {
            let query = SourceQuery::Doql(query.clone());
            if *kind == RecordKind::Device {
                plan = plan.with_primary(query);
            } else if let Some(detail) = plan.details.get_mut(kind) {
                detail.query = query;
            }
        }

        if self.d42.device_source == DeviceSource::Api {
            if self.queries.contains_key(&RecordKind::Device) {
                tracing::warn!(
                    path = DEVICES_PATH,
                    "device query override ignored, device_source is api"
                );
            }
            plan = plan.with_primary(SourceQuery::bulk_devices(self.d42.page_size));
        }

        plan
    }

    /// Overall fetch timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.d42.timeout_secs)
    }

    /// Transport options for the HTTP client
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            ssl_check: self.d42.ssl_check,
            timeout: self.timeout(),
            ..ClientOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const FULL: &str = r#"
[d42]
url = "https://d42.example.com"
username = "admin"
password = "secret"
ssl_check = false
device_source = "api"
page_size = 50

[grouping]
strategy = "single_field"
field = "service_level"
empty = "drop"
strict = true

[queries]
ip_address = "SELECT ip_address, device_fk FROM view_ipaddress_v1"

[output]
hostfile = "/tmp/hosts"
"#;

    #[test]
    fn test_parse_full_file() {
        let config = Config::parse(FULL).unwrap();
        assert!(!config.d42.ssl_check);
        assert_eq!(config.d42.device_source, DeviceSource::Api);
        assert_eq!(config.d42.page_size, 50);
        assert_eq!(config.d42.timeout_secs, 30);
        assert_eq!(config.grouping.empty, EmptyMode::Drop);
        assert_eq!(config.policy(), MalformedPolicy::Strict);
        assert_eq!(config.output.hostfile, PathBuf::from("/tmp/hosts"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.d42.ssl_check);
        assert_eq!(config.grouping.reference_field, "name");
        assert_eq!(config.grouping.empty_group, "none");
        assert_eq!(config.output.hostfile, PathBuf::from("hosts"));
        assert_eq!(config.log.level, "info");
        assert_eq!(config.policy(), MalformedPolicy::Recover);
    }

    #[test]
    fn test_env_only_configuration() {
        let config = Config::default()
            .apply_env(env(&[
                ("D42_URL", "https://cmdb.local"),
                ("D42_USER", "ansible"),
                ("D42_PWD", "pw"),
                ("D42_SKIP_SSL_CHECK", "yes"),
                ("GROUP_BY_FIELD", "tags"),
                ("GROUP_BY_REFERENCE_FIELD", "device_pk"),
                ("SPLIT_GROUP_BY_COMMA", "true"),
            ]))
            .unwrap();

        assert!(config.validate().is_ok());
        assert!(!config.d42.ssl_check);
        assert_eq!(config.grouping.reference_field, "device_pk");
        assert_eq!(
            config.grouping_spec().unwrap(),
            GroupingSpec::SingleField {
                field: "tags".to_string(),
                split_on_comma: true,
                empty_policy: EmptyPolicy::Bucket("none".to_string()),
            }
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let config = Config::parse(FULL)
            .unwrap()
            .apply_env(env(&[("D42_URL", "https://other"), ("D42_SSL_CHECK", "1")]))
            .unwrap();
        assert_eq!(config.d42.url.as_deref(), Some("https://other"));
        assert!(config.d42.ssl_check);
        assert_eq!(config.d42.username.as_deref(), Some("admin"));
    }

    #[test]
    fn test_invalid_flag() {
        let err = Config::default()
            .apply_env(env(&[("SPLIT_GROUP_BY_COMMA", "maybe")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "SPLIT_GROUP_BY_COMMA",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_reports_first_missing() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(name) if name.starts_with("d42.url")));

        let config = Config::default()
            .apply_env(env(&[("D42_URL", "https://x"), ("D42_USER", "u"), ("D42_PWD", "")]))
            .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(name) if name.starts_with("grouping.field")));
    }

    #[test]
    fn test_blank_empty_group_rejected() {
        let config = Config::parse(FULL_BLANK_BUCKET).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidGrouping(_))
        ));

        let dropped = Config::parse(&FULL_BLANK_BUCKET.replace("bucket", "drop")).unwrap();
        assert!(dropped.validate().is_ok());
    }

    const FULL_BLANK_BUCKET: &str = r#"
[d42]
url = "https://d42.example.com"
username = "admin"
password = "secret"

[grouping]
field = "service_level"
empty = "bucket"
empty_group = "  "
"#;

    #[test]
    fn test_keyed_grouping() {
        let config = Config::parse(
            r#"
[grouping]
strategy = "keyed"

[[grouping.keyed]]
key = "d42_service_level"
prefix = "level"

[[grouping.keyed]]
key = "os_name"
separator = "-"
"#,
        )
        .unwrap();

        match config.grouping_spec().unwrap() {
            GroupingSpec::ComposedKeys(keys) => {
                assert_eq!(keys.len(), 2);
                assert_eq!(keys[0].prefix, "level");
                assert_eq!(keys[0].separator, "_");
                assert_eq!(keys[1].separator, "-");
            }
            other => panic!("unexpected spec {other:?}"),
        }

        let empty = Config::parse("[grouping]\nstrategy = \"keyed\"\n").unwrap();
        assert!(matches!(
            empty.grouping_spec(),
            Err(ConfigError::InvalidGrouping(_))
        ));
    }

    #[test]
    fn test_fetch_plan() {
        let config = Config::parse(FULL).unwrap();
        let plan = config.fetch_plan();
        assert_eq!(plan.primary, SourceQuery::bulk_devices(50));
        assert_eq!(
            plan.details[&RecordKind::IpAddress].query,
            SourceQuery::Doql("SELECT ip_address, device_fk FROM view_ipaddress_v1".to_string())
        );

        let custom = Config::default()
            .apply_env(env(&[(
                "GROUP_BY_QUERY",
                "SELECT device_pk, name, service_level FROM view_device_v2",
            )]))
            .unwrap()
            .fetch_plan();
        assert_eq!(
            custom.primary,
            SourceQuery::Doql(
                "SELECT device_pk, name, service_level FROM view_device_v2".to_string()
            )
        );
        assert_eq!(custom.details.len(), RecordKind::DETAILS.len());
    }
}
