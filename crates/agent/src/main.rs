//! mdacme - Main entry point
//!
//! Manages ACME certificates for managed domains kept in a local store.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mdacme::{
    ConfigError, DriveError, Driver, FileStore, ManagedDomain, ReqwestClient, Store,
    StoreChallenges, StoreError,
};
use mdacme_config::Config;

/// mdacme - ACME certificates for managed domains
#[derive(Parser, Debug)]
#[command(name = "mdacme")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "MDACME_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Store directory, overrides the configuration
    #[arg(short = 'd', long = "store", global = true)]
    store: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a managed domain, the first name being the primary
    Add {
        #[arg(required = true)]
        names: Vec<String>,
        /// Contact address or URI, repeatable
        #[arg(long = "contact")]
        contacts: Vec<String>,
        /// CA directory URL, defaults to the configured CA
        #[arg(long = "ca")]
        ca_url: Option<String>,
        /// Accepted terms-of-service URL
        #[arg(long = "agreement")]
        agreement: Option<String>,
    },
    /// Change a property of a managed domain
    Update {
        name: String,
        #[command(subcommand)]
        change: Update,
    },
    /// List managed domains
    List,
    /// Obtain certificates for the given managed domains, or all of them
    Drive { names: Vec<String> },
    /// Account and authorization operations against the CA
    Acme {
        #[command(subcommand)]
        command: AcmeCommand,
    },
}

#[derive(Subcommand, Debug)]
enum Update {
    /// Replace the contact list
    Contacts {
        #[arg(required = true)]
        contacts: Vec<String>,
    },
    /// Set the accepted terms-of-service URL
    Agreement { url: String },
    /// Set the CA directory URL and protocol
    Ca {
        url: String,
        protocol: Option<String>,
    },
    /// Link an account by URL
    Account { url: String },
    /// Replace the name set, the primary name is always kept
    Domains {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AcmeCommand {
    /// Register a new account
    Newreg {
        #[arg(required = true)]
        contacts: Vec<String>,
        /// CA directory URL, defaults to the configured CA
        #[arg(long = "ca")]
        ca_url: Option<String>,
        /// Agree to these terms of service while registering
        #[arg(long = "agree")]
        agreement: Option<String>,
    },
    /// Agree to terms of service for an account
    Agree { account: String, agreement: String },
    /// Create an authorization for a name outside of any order
    Authz { account: String, domain: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let json = cli.json;
    match run(cli) {
        Ok(output) => {
            if json {
                println!("{}", json!({"status": 0, "description": "", "output": output}));
            } else {
                for line in &output {
                    println!("{}", render(line));
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            let (status, description) = status_of(&e);
            error!(status, error = %e, "Command failed");
            if json {
                println!(
                    "{}",
                    json!({"status": status, "description": description, "output": []})
                );
            }
            eprintln!("mdacme: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Numeric status of a failed command, mirroring [`DriveError::status`]
fn status_of(error: &anyhow::Error) -> (i32, String) {
    if let Some(e) = error.downcast_ref::<DriveError>() {
        return e.status();
    }
    if let Some(e) = error.downcast_ref::<ConfigError>() {
        return DriveError::Config(e.clone()).status();
    }
    if error.downcast_ref::<StoreError>().is_some() {
        return (5, "Input/output error".to_string());
    }
    (22, "Invalid argument".to_string())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).context("Failed to load configuration file")?,
        None => {
            debug!("No configuration file given, using defaults");
            Config::default()
        }
    };
    if let Some(store) = &cli.store {
        config.store_dir = store.clone();
    }
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

fn run(cli: Cli) -> Result<Vec<Value>> {
    let config = load_config(&cli)?;
    let store: Arc<dyn Store> = Arc::new(
        FileStore::new(&config.store_dir)
            .with_context(|| format!("Failed to open store {}", config.store_dir.display()))?,
    );

    match cli.command {
        Commands::Add {
            names,
            contacts,
            ca_url,
            agreement,
        } => add(&config, store.as_ref(), names, contacts, ca_url, agreement),
        Commands::Update { name, change } => update(store.as_ref(), &name, change),
        Commands::List => list(store.as_ref()),
        Commands::Drive { names } => {
            let driver = driver(&config, Arc::clone(&store))?;
            block_on(drive(driver, names))
        }
        Commands::Acme { command } => {
            let driver = driver(&config, Arc::clone(&store))?;
            block_on(acme(&config, driver, command))
        }
    }
}

fn driver(config: &Config, store: Arc<dyn Store>) -> Result<Driver> {
    let http = ReqwestClient::new(&config.transport).map_err(DriveError::from)?;
    let challenges = StoreChallenges::with_types(Arc::clone(&store), config.drive.challenges.clone());
    Ok(Driver::new(
        config.drive.clone(),
        store,
        Arc::new(http),
        Arc::new(challenges),
    ))
}

fn block_on<F: std::future::Future<Output = Result<Vec<Value>>>>(future: F) -> Result<Vec<Value>> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(future)
}

fn add(
    config: &Config,
    store: &dyn Store,
    names: Vec<String>,
    contacts: Vec<String>,
    ca_url: Option<String>,
    agreement: Option<String>,
) -> Result<Vec<Value>> {
    let mut md = ManagedDomain::new(&names).map_err(DriveError::from)?;
    if store.load_md(&md.name)?.is_some() {
        return Err(DriveError::from(ConfigError::DuplicateMd(md.name)).into());
    }
    md.set_contacts(&contacts);
    md.ca.url = ca_url.or_else(|| config.ca.url.clone());
    md.ca.protocol = config.ca.protocol.clone();
    md.ca.agreement = agreement;

    store.save_md(&md)?;
    info!(md = %md.name, domains = ?md.domains, "Added managed domain");
    Ok(vec![serde_json::to_value(&md)?])
}

fn update(store: &dyn Store, name: &str, change: Update) -> Result<Vec<Value>> {
    let mut md = store
        .load_md(name)?
        .ok_or_else(|| DriveError::from(ConfigError::UnknownMd(name.to_string())))?;

    match change {
        Update::Contacts { contacts } => md.set_contacts(&contacts),
        Update::Agreement { url } => md.ca.agreement = Some(url),
        Update::Ca { url, protocol } => {
            if md.ca_url() != Some(url.as_str()) && md.account().is_some() {
                warn!(md = %md.name, "CA changed, unlinking account");
                md.ca.account = None;
            }
            md.ca.url = Some(url);
            if let Some(protocol) = protocol {
                md.ca.protocol = protocol;
            }
        }
        Update::Account { url } => md.ca.account = Some(url),
        Update::Domains { names } => md.set_domains(&names).map_err(DriveError::from)?,
    }

    store.save_md(&md)?;
    info!(md = %md.name, "Updated managed domain");
    Ok(vec![serde_json::to_value(&md)?])
}

fn list(store: &dyn Store) -> Result<Vec<Value>> {
    let mut output = Vec::new();
    for name in store.list_mds()? {
        if let Some(md) = store.load_md(&name)? {
            output.push(serde_json::to_value(&md)?);
        }
    }
    Ok(output)
}

async fn drive(driver: Driver, names: Vec<String>) -> Result<Vec<Value>> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling drive");
            on_signal.cancel();
        }
    });

    let names = if names.is_empty() {
        driver.store().list_mds()?
    } else {
        names
    };

    let mut output = Vec::new();
    for name in names {
        let cert = driver.drive(&name, &cancel).await?;
        output.push(json!({
            "name": name,
            "state": "complete",
            "domains": cert.names,
            "expires": cert.not_after,
            "serial": cert.serial,
        }));
    }
    Ok(output)
}

async fn acme(config: &Config, driver: Driver, command: AcmeCommand) -> Result<Vec<Value>> {
    let record = match command {
        AcmeCommand::Newreg {
            contacts,
            ca_url,
            agreement,
        } => {
            let ca_url = ca_url
                .or_else(|| config.ca.url.clone())
                .ok_or_else(|| DriveError::from(ConfigError::NoCaUrl("(account)".to_string())))?;
            let contacts = mdacme::md::normalize_contacts(&contacts);
            driver
                .register_account(&ca_url, &contacts, agreement.as_deref())
                .await?
        }
        AcmeCommand::Agree { account, agreement } => {
            driver.agree_to_terms(&account, &agreement).await?
        }
        AcmeCommand::Authz { account, domain } => {
            let authz = driver
                .pre_authorize(&account, &domain, &CancellationToken::new())
                .await?;
            return Ok(vec![serde_json::to_value(&authz)?]);
        }
    };
    Ok(vec![serde_json::to_value(&record)?])
}

/// One line of human readable output
fn render(value: &Value) -> String {
    if let Some(domains) = value.get("domains").and_then(Value::as_array) {
        let domains: Vec<&str> = domains.iter().filter_map(Value::as_str).collect();
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_else(|| domains.first().copied().unwrap_or(""));
        return format!("{} {} [{}]", name, field(value, "state"), domains.join(", "));
    }
    if !field(value, "url").is_empty() {
        return format!("{} {}", field(value, "id"), field(value, "url"));
    }
    if !field(value, "location").is_empty() {
        return format!(
            "{} {} {}",
            field(value, "domain"),
            field(value, "state"),
            field(value, "location")
        );
    }
    value.to_string()
}

fn field<'a>(value: &'a Value, name: &str) -> &'a str {
    value.get(name).and_then(Value::as_str).unwrap_or("")
}
