//! Tablekey - Session and device-pairing credentials for POS terminals
//!
//! Command-line front end over the Tablekey libraries. Credentials live in a
//! JSON session file so consecutive invocations share one session.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tablekey_auth::{
    device_options, DeviceSearch, DeviceStatusProbe, KioskOperatorSession, KioskPairingClient,
    PinProvider, SessionTokenManager, ShiftTracker,
};
use tablekey_core::{
    Config, DeviceType, HttpRequest, JsonFileStore, KeyValueStore, Method, PairConfirm,
    Transport,
};
use tablekey_gateway::{
    CredentialSource, DeviceCredentials, OperatorCredentials, PanelCredentials, RequestGateway,
    ReqwestTransport,
};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Tablekey - Manage panel sessions, terminal pairing and operator PINs
#[derive(Parser, Debug)]
#[command(name = "tablekey")]
#[command(version, about, long_about = None)]
struct Args {
    /// Backend base URL
    #[arg(short, long, env = "TABLEKEY_URL", default_value = "http://localhost:3000")]
    url: String,

    /// Session file (default: <cache dir>/tablekey/session.json)
    #[arg(short, long, env = "TABLEKEY_STORE")]
    store: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "15")]
    timeout: u64,

    /// Operator session lifetime after a PIN login, in minutes
    #[arg(long)]
    operator_ttl: Option<u64>,

    /// Pairing code length at which device search starts
    #[arg(long)]
    min_search_len: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a panel session
    Login {
        #[arg(short, long)]
        email: String,

        /// Password (prompted for when omitted)
        #[arg(short, long, env = "TABLEKEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the panel session
    Logout,

    /// Force an access token refresh
    Refresh,

    /// Check a pairing code and list stations
    PairStart {
        #[arg(short, long)]
        code: String,

        /// Device type: commander, cash, monitor
        #[arg(short = 't', long = "type")]
        device_type: DeviceType,
    },

    /// List catalogued devices registered under a pairing code
    Devices {
        #[arg(short, long)]
        code: String,

        #[arg(short = 't', long = "type")]
        device_type: DeviceType,
    },

    /// Pair this terminal
    Pair {
        #[arg(short, long)]
        code: String,

        #[arg(short = 't', long = "type")]
        device_type: DeviceType,

        /// Name for a new device
        #[arg(short, long, conflicts_with = "device")]
        name: Option<String>,

        /// Adopt a catalogued device by id
        #[arg(short, long)]
        device: Option<i64>,

        /// Station for cash and monitor terminals
        #[arg(long)]
        station: Option<i64>,
    },

    /// Unlock the terminal with an operator PIN
    PinLogin {
        /// PIN (prompted for when omitted)
        #[arg(long)]
        pin: Option<String>,
    },

    /// Show credential and pairing state
    Status,

    /// Probe pairing state periodically until interrupted
    Monitor {
        /// Seconds between probes
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Forget this terminal's pairing
    Unpair,

    /// Show, open or close the active cash shift
    Shift {
        /// Shift id to make active
        id: Option<String>,

        #[arg(long, conflicts_with = "id")]
        clear: bool,
    },

    /// Send an authenticated request and print the response
    Get {
        /// Request path, e.g. /invoices
        path: String,

        #[arg(long, value_enum, default_value = "panel")]
        tier: TierArg,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TierArg {
    Panel,
    Device,
    Operator,
}

/// Reads an operator PIN from the terminal
struct StdinPin;

#[async_trait]
impl PinProvider for StdinPin {
    async fn request_pin(&self) -> tablekey_core::Result<String> {
        prompt("Operator PIN: ").await
    }
}

async fn prompt(label: &'static str) -> tablekey_core::Result<String> {
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        eprint!("{}", label);
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok::<_, tablekey_core::Error>(line.trim().to_string())
    })
    .await
    .map_err(|e| tablekey_core::Error::Io(std::io::Error::other(e)))?
}

fn parse_method(method: &str) -> Result<Method> {
    Ok(match method.to_uppercase().as_str() {
        "GET" => Method::Get,
        "POST" => Method::Post,
        "PUT" => Method::Put,
        "PATCH" => Method::Patch,
        "DELETE" => Method::Delete,
        other => bail!("Unsupported method: {}", other),
    })
}

struct App {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
}

impl App {
    fn session(&self) -> SessionTokenManager {
        SessionTokenManager::new(&self.config, self.store.clone(), self.transport.clone())
    }

    fn pairing(&self) -> KioskPairingClient {
        KioskPairingClient::new(&self.config, self.store.clone(), self.transport.clone())
    }

    fn operator(&self) -> KioskOperatorSession {
        KioskOperatorSession::new(&self.config, self.store.clone(), self.transport.clone())
    }

    fn probe(&self) -> DeviceStatusProbe {
        DeviceStatusProbe::new(self.store.clone(), self.transport.clone())
    }

    fn shift(&self) -> ShiftTracker {
        ShiftTracker::new(self.store.clone())
    }

    fn gateway(&self, tier: TierArg) -> Result<RequestGateway> {
        let source: Arc<dyn CredentialSource> = match tier {
            TierArg::Panel => Arc::new(PanelCredentials::new(self.session())),
            TierArg::Device => Arc::new(DeviceCredentials::new(self.store.clone())),
            TierArg::Operator => Arc::new(
                OperatorCredentials::new(Arc::new(self.operator()))
                    .with_pin_provider(Arc::new(StdinPin)),
            ),
        };
        Ok(RequestGateway::builder(format!("{:?}", tier).to_lowercase())
            .transport(self.transport.clone())
            .credentials(source)
            .shift(self.shift())
            .build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    debug!("Tablekey v{}", env!("CARGO_PKG_VERSION"));

    let config = config_from(&args);
    let store = match args.store {
        Some(path) => JsonFileStore::open(path)?,
        None => JsonFileStore::open_default()?,
    };
    debug!("Session file: {}", store.path().display());

    let app = App {
        transport: Arc::new(ReqwestTransport::new(&config)?),
        store: Arc::new(store),
        config,
    };

    run(&app, args.command).await
}

fn config_from(args: &Args) -> Config {
    let mut config = Config::new()
        .with_base_url(args.url.as_str())
        .with_request_timeout(Duration::from_secs(args.timeout));
    if let Some(minutes) = args.operator_ttl {
        config = config.with_operator_ttl(Duration::from_secs(minutes.saturating_mul(60)));
    }
    if let Some(len) = args.min_search_len {
        config = config.with_min_search_len(len);
    }
    config
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt("Password: ").await?,
            };
            let user = app.session().login(&email, &password).await?;
            info!("Logged in as {}", email);
            println!("{}", serde_json::to_string_pretty(&user)?);
        }

        Command::Logout => app.session().logout()?,

        Command::Refresh => {
            let session = app.session();
            session.refresh().await?;
            if let Some(expires_at) = session.access_expiry()? {
                info!("Access token valid until {} (ms epoch)", expires_at);
            }
        }

        Command::PairStart { code, device_type } => {
            let start = app.pairing().pair_start(&code, device_type).await?;
            println!("Restaurant:       {}", start.restaurant_id);
            println!("Device type:      {}", start.device_type);
            println!("Station required: {}", start.require_station);
            for station in &start.stations {
                println!("  [{}] {}", station.id, station.name);
            }
        }

        Command::Devices { code, device_type } => {
            let search = DeviceSearch::new(&app.config, app.pairing());
            let devices = search
                .search(&code, device_type)
                .await?
                .unwrap_or_default();
            if devices.is_empty() {
                println!("No devices found");
            }
            for option in device_options(&devices) {
                let marker = if option.disabled { "-" } else { "*" };
                println!("{} [{}] {}", marker, option.id, option.label);
            }
        }

        Command::Pair {
            code,
            device_type,
            name,
            device,
            station,
        } => {
            if station.is_some() && !device_type.expects_station() {
                bail!("{} terminals are not bound to a station", device_type);
            }
            let pairing = app.pairing();
            let start = pairing.pair_start(&code, device_type).await?;
            if start.require_station && station.is_none() {
                bail!("A station is required for {} terminals (use --station)", device_type);
            }

            let confirm = match (device, name) {
                (Some(id), _) => {
                    let devices = pairing.search_devices(&code, device_type).await?;
                    let catalogued = devices
                        .iter()
                        .find(|d| d.id == id)
                        .ok_or_else(|| anyhow!("Device {} is not registered under this code", id))?;
                    if catalogued.is_revoked() {
                        info!("Device {} was revoked and will be restored", id);
                    }
                    PairConfirm::adopting(catalogued, code.as_str(), device_type)?
                }
                (None, Some(name)) => PairConfirm {
                    code: code.clone(),
                    device_type,
                    device_name: name,
                    station_id: None,
                    fingerprint: None,
                },
                (None, None) => bail!("Pass --name for a new device or --device to adopt one"),
            };

            let fingerprint = pairing.device_fingerprint(device_type)?;
            pairing
                .pair_confirm(confirm.with_station(station).with_fingerprint(Some(fingerprint)))
                .await?;
            println!("Paired");
        }

        Command::PinLogin { pin } => {
            let pin = match pin {
                Some(pin) => pin,
                None => StdinPin.request_pin().await?,
            };
            app.operator().login_with_pin(&pin).await?;
            println!("Terminal unlocked");
        }

        Command::Status => {
            let state = app.probe().probe().await?;
            println!("Pairing:  {}", state);
            println!("Panel:    {}", validity(app.session().is_valid()));
            println!("Operator: {}", validity(app.operator().is_valid()));
            match app.shift().current()? {
                Some(id) => println!("Shift:    {}", id),
                None => println!("Shift:    none"),
            }
        }

        Command::Monitor { interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| app.config.probe_interval());
            let (mut states, handle) = Arc::new(app.probe()).spawn_monitor(interval).await?;
            println!("{}", *states.borrow_and_update());

            loop {
                tokio::select! {
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        println!("{}", *states.borrow_and_update());
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Stopping monitor");
                        break;
                    }
                }
            }
            handle.abort();
        }

        Command::Unpair => {
            app.probe().unpair_device().await?;
            println!("Unpaired");
        }

        Command::Shift { id, clear } => {
            let tracker = app.shift();
            if clear {
                tracker.clear()?;
            } else if let Some(id) = id {
                tracker.set(&id)?;
            }
            match tracker.current()? {
                Some(id) => println!("{}", id),
                None => println!("No active shift"),
            }
        }

        Command::Get {
            path,
            tier,
            method,
            data,
        } => {
            let gateway = app.gateway(tier)?;
            let mut teardown = gateway.subscribe_teardown();

            let mut request = HttpRequest::new(parse_method(&method)?, path);
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).context("--data must be valid JSON")?;
                request = request.json(&body)?;
            }

            match gateway.request(request).await {
                Ok(response) => match serde_json::from_str::<serde_json::Value>(&response.body) {
                    Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                    Err(_) => println!("{}", response.body),
                },
                Err(e) => {
                    if let Ok(event) = teardown.try_recv() {
                        warn!("Session torn down: {}", event);
                    }
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

fn validity(valid: bool) -> &'static str {
    if valid {
        "valid"
    } else {
        "missing or expired"
    }
}
