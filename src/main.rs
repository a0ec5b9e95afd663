//! CLI entry point for depctl, a command-line client for the Apple DEP API.
//!
//! Credentials and session tokens live in a directory-backed store (one JSON
//! document per configuration name). `import-tokens` seeds a name from the
//! decrypted server token JSON; every other subcommand runs one DEP
//! operation for `--name` and prints the response as pretty JSON.
//!
//! Exit codes:
//! - 0: success
//! - 1: runtime error (missing configuration, auth failure, API error, etc.)
//! - 2: argument validation error (clap handles this automatically)

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use dep_client::account::account_detail;
use dep_client::client::DepClient;
use dep_client::config::ClientConfig;
use dep_client::devices::{DeviceListRequest, device_details, fetch_devices, sync_devices};
use dep_client::oauth::Credentials;
use dep_client::profile::{Profile, assign_profile, define_profile, fetch_profile, remove_profile};
use dep_client::store::FileStore;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML client configuration (server URLs, endpoint overrides).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding per-name credentials and session tokens.
    #[arg(long, env = "DEP_STORE_DIR")]
    store: PathBuf,

    /// DEP configuration name to act as.
    #[arg(long, env = "DEP_NAME")]
    name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store OAuth credentials for --name from a decrypted token JSON file.
    ImportTokens {
        /// JSON file with consumer_key, consumer_secret, access_token and
        /// access_secret.
        file: PathBuf,
    },

    /// Show the account (MDM server) details.
    Account,

    /// Define a profile from a JSON file.
    DefineProfile {
        /// JSON file holding the profile.
        file: PathBuf,
    },

    /// Fetch a profile by UUID.
    FetchProfile {
        /// Profile UUID.
        uuid: String,
    },

    /// Assign a profile to devices.
    AssignProfile {
        /// Profile UUID.
        uuid: String,
        /// Device serial numbers.
        #[arg(required = true)]
        serials: Vec<String>,
    },

    /// Remove any assigned profile from devices.
    RemoveProfile {
        /// Device serial numbers.
        #[arg(required = true)]
        serials: Vec<String>,
    },

    /// List devices assigned to the MDM server, one page at a time.
    Devices {
        /// Cursor from a previous page.
        #[arg(long)]
        cursor: Option<String>,
        /// Page size.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// List device changes since a cursor.
    SyncDevices {
        /// Cursor from a previous fetch or sync.
        #[arg(long)]
        cursor: String,
        /// Page size.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Show details for specific devices.
    DeviceDetails {
        /// Device serial numbers.
        #[arg(required = true)]
        serials: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

async fn run(args: Cli) -> CliResult {
    let store = FileStore::new(&args.store);

    if let Command::ImportTokens { file } = &args.command {
        let creds: Credentials = read_json(file)?;
        store.put_credentials(&args.name, &creds).await?;
        eprintln!(
            "Stored credentials for {:?} in {}",
            args.name,
            store.dir().display()
        );
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    let client = DepClient::new(config, Arc::new(store))?;
    let name = args.name.as_str();

    match args.command {
        Command::ImportTokens { .. } => Ok(()),
        Command::Account => print_json(&account_detail(&client, name).await?),
        Command::DefineProfile { file } => {
            let profile: Profile = read_json(&file)?;
            print_json(&define_profile(&client, name, &profile).await?)
        }
        Command::FetchProfile { uuid } => print_json(&fetch_profile(&client, name, &uuid).await?),
        Command::AssignProfile { uuid, serials } => {
            print_json(&assign_profile(&client, name, &uuid, &serials).await?)
        }
        Command::RemoveProfile { serials } => {
            print_json(&remove_profile(&client, name, &serials).await?)
        }
        Command::Devices { cursor, limit } => {
            let req = DeviceListRequest { cursor, limit };
            print_json(&fetch_devices(&client, name, &req).await?)
        }
        Command::SyncDevices { cursor, limit } => {
            let req = DeviceListRequest {
                cursor: Some(cursor),
                limit,
            };
            print_json(&sync_devices(&client, name, &req).await?)
        }
        Command::DeviceDetails { serials } => {
            print_json(&device_details(&client, name, &serials).await?)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .map_err(|e| format!("failed to parse {}: {e}", path.display()))?;
    Ok(value)
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
