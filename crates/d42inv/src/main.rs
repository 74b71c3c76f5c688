//! d42inv
//!
//! Builds Ansible inventory from a Device42 CMDB: dynamic inventory JSON,
//! a static hosts file, password lookups and raw DOQL queries.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use d42inv_client::{Credentials, DoqlFormat, HttpClient};
use d42inv_core::{
    AnsibleInventory, GroupingEngine, Groups, InventoryCollector, InventoryResult, register,
    write_hostfile,
};
use eyre::{WrapErr, eyre};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

/// Device42 to Ansible inventory
#[derive(Parser, Debug)]
#[command(name = "d42inv", version, about)]
struct Cli {
    /// Print the dynamic inventory as JSON (the default action)
    #[arg(long, conflicts_with = "host")]
    list: bool,

    /// Print variables of one host; all variables are already under `_meta`
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Configuration file
    #[arg(short, long, env = "D42INV_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the static hosts file
    Hostfile {
        /// Destination, overriding `output.hostfile`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Look up the stored password of a device account
    Password {
        /// Device name
        #[arg(long)]
        device: String,
        /// Account name
        #[arg(long)]
        user: String,
    },
    /// Run a DOQL query; `@` stands for a single quote
    Doql {
        /// Query text
        query: String,
        /// Result shape
        #[arg(long, value_enum, default_value_t = OutputShape::ListDicts)]
        format: OutputShape,
    },
}

/// Shape of raw DOQL output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputShape {
    /// One object per row, keyed by the header
    ListDicts,
    /// One string per line, no header
    List,
    /// The whole body with newlines removed
    String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .wrap_err("failed to load configuration")?
    .apply_env(|name| std::env::var(name).ok())?;

    init_tracing(&config.log.level, cli.json_logs);

    match cli.command {
        Some(Command::Hostfile { output }) => {
            config.validate()?;
            let path = output.unwrap_or_else(|| config.output.hostfile.clone());
            hostfile(&config, path).await
        }
        Some(Command::Password { device, user }) => {
            config.validate_connection()?;
            let password = connect(&config)?.get_password(&device, &user).await?;
            println!("{password}");
            Ok(())
        }
        Some(Command::Doql { query, format }) => {
            config.validate_connection()?;
            doql(&connect(&config)?, &query, format).await
        }
        None if !cli.list && cli.host.is_some() => {
            println!("{{}}");
            Ok(())
        }
        None => {
            config.validate()?;
            list(&config).await
        }
    }
}

/// Logs go to stderr; stdout carries inventory output only
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn connect(config: &Config) -> Result<HttpClient> {
    let d42 = &config.d42;
    let url = d42.url.as_deref().ok_or_else(|| eyre!("d42.url is not set"))?;
    let credentials = Credentials::new(
        d42.username.clone().unwrap_or_default(),
        d42.password.clone().unwrap_or_default(),
    );
    HttpClient::new(url, credentials, &config.client_options())
        .wrap_err_with(|| format!("cannot create client for {url}"))
}

async fn build(config: &Config) -> Result<(InventoryResult, Groups)> {
    let policy = config.policy();
    let client = Arc::new(connect(config)?);

    let result = InventoryCollector::new(client)
        .with_timeout(config.timeout())
        .with_policy(policy)
        .collect(&config.fetch_plan())
        .await
        .wrap_err("failed to collect devices")?;

    let groups = GroupingEngine::new(config.grouping_spec()?)
        .with_policy(policy)
        .group(&result)?;

    info!(
        devices = result.total_count,
        groups = groups.len(),
        dropped_detail_rows = result.stats.dropped_detail_rows(),
        "inventory built"
    );
    Ok((result, groups))
}

async fn list(config: &Config) -> Result<()> {
    let (result, groups) = build(config).await?;

    let mut inventory = AnsibleInventory::new();
    register(
        &mut inventory,
        &result,
        &groups,
        &config.grouping.reference_field,
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &inventory.to_json())?;
    writeln!(out)?;
    Ok(())
}

async fn hostfile(config: &Config, path: PathBuf) -> Result<()> {
    let (result, groups) = build(config).await?;

    let file =
        File::create(&path).wrap_err_with(|| format!("cannot create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_hostfile(
        &mut writer,
        &groups,
        &result,
        &config.grouping.reference_field,
    )?;
    writer.flush()?;

    info!(path = %path.display(), groups = groups.len(), "hosts file written");
    Ok(())
}

async fn doql(client: &HttpClient, query: &str, shape: OutputShape) -> Result<()> {
    let query = query.replace('@', "'");
    match shape {
        OutputShape::ListDicts => {
            let rows = client.doql(&query, DoqlFormat::Csv).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputShape::List => {
            let body = client.doql_text(&query, false, DoqlFormat::Csv).await?;
            let lines: Vec<&str> = body.split('\n').collect();
            println!("{}", serde_json::to_string_pretty(&lines)?);
        }
        OutputShape::String => {
            let body = client.doql_text(&query, false, DoqlFormat::Csv).await?;
            println!("{}", body.replace('\n', ""));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_and_host() {
        let cli = Cli::try_parse_from(["d42inv", "--list"]).unwrap();
        assert!(cli.list);
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["d42inv", "--host", "web-01"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("web-01"));

        assert!(Cli::try_parse_from(["d42inv", "--list", "--host", "x"]).is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["d42inv", "doql", "SELECT 1", "--format", "list"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Doql {
                format: OutputShape::List,
                ..
            })
        ));

        let cli =
            Cli::try_parse_from(["d42inv", "password", "--device", "db-01", "--user", "root"])
                .unwrap();
        assert!(matches!(cli.command, Some(Command::Password { .. })));

        let cli = Cli::try_parse_from(["d42inv", "hostfile", "-o", "/tmp/hosts"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Hostfile { output: Some(_) })
        ));
    }
}
