//! politikontroller CLI
//!
//! Queries the politikontroller.no backend for active traffic controls.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use politikontroller::{to_feature_collection, Client, Config, VERSION};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "politikontroller")]
#[command(version = VERSION)]
#[command(about = "Client for politikontroller.no traffic control reports", long_about = None)]
struct Cli {
    /// Username (i.e. phone number). Falls back to the saved config.
    #[arg(short, long, env = "POLITIKONTROLLER_USERNAME", global = true)]
    username: Option<String>,

    /// Password. Falls back to the saved config.
    #[arg(short, long, env = "POLITIKONTROLLER_PASSWORD", global = true)]
    password: Option<String>,

    /// Set logging level to DEBUG
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get a list of all active controls near a position
    GetControls {
        /// Your position (latitude); falls back to the saved config
        #[arg(long)]
        lat: Option<f64>,

        /// Your position (longitude); falls back to the saved config
        #[arg(long)]
        lng: Option<f64>,

        /// Keep every report separate instead of merging duplicates
        #[arg(long)]
        no_merge: bool,

        /// Print a GeoJSON feature collection instead of records
        #[arg(long)]
        geojson: bool,
    },

    /// Get all active controls inside a radius, with full details
    GetControlsRadius {
        /// Radius center (latitude)
        #[arg(long)]
        lat: f64,

        /// Radius center (longitude)
        #[arg(long)]
        lng: f64,

        /// Radius size in kilometers
        #[arg(long)]
        radius: u32,

        /// Speed hint passed to the backend
        #[arg(long)]
        speed: Option<u32>,

        /// Keep every report separate instead of merging duplicates
        #[arg(long)]
        no_merge: bool,
    },

    /// Get details on one control
    GetControl {
        control_id: u32,
    },

    /// Get own registered map areas
    GetMaps,

    /// Get account settings
    GetSettings,

    /// Exchange accumulated points
    ExchangePoints,

    /// Probe the session
    Check,

    /// Send an activation SMS
    AccountSendSms,

    /// Activate the account by SMS
    AccountAuthSms,

    /// Activate an account with a code
    AccountAuth {
        code: String,
        uid: u32,
    },

    /// Register a new account
    AccountRegister {
        phone: u64,
        password: String,
        name: String,
        country: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    configure_logging(cli.debug);

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {e}");
        Config::default()
    });

    // Registration is the one flow that works without credentials.
    if let Commands::AccountRegister {
        phone,
        password,
        name,
        country,
    } = &cli.command
    {
        let client = Client::new();
        let result = client
            .account_register(*phone, password, name, country)
            .await?;
        println!("{result}");
        return Ok(());
    }

    let username = cli
        .username
        .or_else(|| config.username.clone())
        .context("no username given (flag, POLITIKONTROLLER_USERNAME or config)")?;
    let password = cli
        .password
        .or_else(|| config.password.clone())
        .context("no password given (flag, POLITIKONTROLLER_PASSWORD or config)")?;
    let client = Client::initialize(&username, &password)?;

    match cli.command {
        Commands::GetControls {
            lat,
            lng,
            no_merge,
            geojson,
        } => {
            let (lat, lng) = match (lat, lng) {
                (Some(lat), Some(lng)) => (lat, lng),
                _ => config
                    .position
                    .ok_or_else(|| anyhow::anyhow!("no position given and none saved in config"))?,
            };
            let clusters = client.get_controls(lat, lng, !no_merge).await?;
            if geojson {
                println!("{}", serde_json::to_string_pretty(&to_feature_collection(&clusters))?);
            } else {
                println!("{}", serde_json::to_string_pretty(&clusters)?);
            }
        }
        Commands::GetControlsRadius {
            lat,
            lng,
            radius,
            speed,
            no_merge,
        } => {
            let lists = client
                .get_controls_in_radius(lat, lng, radius, speed, !no_merge)
                .await?;
            let controls = client.get_controls_from_lists(&lists).await?;
            println!("{}", serde_json::to_string_pretty(&controls)?);
        }
        Commands::GetControl { control_id } => match client.get_control(control_id).await? {
            Some(control) => println!("{}", serde_json::to_string_pretty(&control)?),
            None => bail!("control {control_id} not found"),
        },
        Commands::GetMaps => {
            let maps = client.get_maps().await?;
            println!("{}", serde_json::to_string_pretty(&maps)?);
        }
        Commands::GetSettings => {
            let settings = client.get_settings().await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::ExchangePoints => {
            let result = client.exchange_points().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Check => {
            println!("{}", client.check().await?);
        }
        Commands::AccountSendSms => {
            println!("{}", client.account_send_sms().await?);
        }
        Commands::AccountAuthSms => {
            println!("{}", client.account_auth_sms().await?);
        }
        Commands::AccountAuth { code, uid } => {
            println!("{}", client.account_auth(&code, uid).await?);
        }
        Commands::AccountRegister { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn configure_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
