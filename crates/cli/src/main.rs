mod degraded;

use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use degraded::{LazyBus, LazyCache};
use jsonwebtoken::Algorithm;
use relaygate_auth::AuthVerifier;
use relaygate_bus::{BusClient, NatsBus};
use relaygate_cache::{RedisSessionCache, SessionCache};
use relaygate_config::RelaygateConfig;
use relaygate_dispatcher::{Dispatcher, DispatcherConfig};
use relaygate_gateway::{AppState, GatewayState};
use secrecy::SecretString;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for a config-loading or config-value error (spec.md §6).
const EXIT_CONFIG_ERROR: u8 = 2;
/// Exit code for an unreachable bus/cache at startup under `startup_strict`.
const EXIT_STARTUP_UNAVAILABLE: u8 = 3;

#[derive(Parser)]
#[command(name = "relaygate", about = "LLM chat gateway streaming dispatcher")]
struct Cli {
    /// Address to bind to (overrides config value).
    #[arg(long, env = "RELAYGATE_BIND")]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, env = "RELAYGATE_PORT")]
    port: Option<u16>,
    /// Path to a config file (defaults to the standard search path).
    #[arg(long, env = "RELAYGATE_CONFIG")]
    config: Option<std::path::PathBuf>,
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

/// Initialise tracing with an `EnvFilter` derived from `--log-level`
/// (overridable by `RUST_LOG`), and either a human-readable or JSON
/// formatter per `--json-logs` (`SPEC_FULL.md` §8.1).
fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

fn parse_algorithm(name: &str) -> anyhow::Result<Algorithm> {
    match name {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        other => anyhow::bail!("unsupported jwt_alg: {other}"),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<RelaygateConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = relaygate_config::loader::load_config(path)?;
            relaygate_config::loader::apply_env_overrides(&mut config);
            config
        },
        None => relaygate_config::discover_and_load(),
    };
    if let Some(ref bind) = cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "relaygate starting");

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        },
    };

    let algorithm = match parse_algorithm(&config.auth.jwt_alg) {
        Ok(alg) => alg,
        Err(err) => {
            error!(%err, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        },
    };
    if config.auth.jwt_secret.is_empty() {
        error!("JWT_SECRET is required but was empty");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let bus_reconnect_min = Duration::from_secs(config.timeouts.bus_reconnect_min_secs);
    let bus_reconnect_max = Duration::from_secs(config.timeouts.bus_reconnect_max_secs);

    let bus: Arc<dyn BusClient> = match NatsBus::connect(&config.bus.url, &config.bus.raw_memory_subject).await {
        Ok(bus) => Arc::new(bus),
        Err(err) if config.startup_strict => {
            error!(%err, url = %config.bus.url, "bus unreachable at startup (startup_strict)");
            return ExitCode::from(EXIT_STARTUP_UNAVAILABLE);
        },
        Err(err) => {
            warn!(%err, url = %config.bus.url, "bus unreachable at startup, starting degraded");
            Arc::new(LazyBus::spawn(
                config.bus.url.clone(),
                config.bus.raw_memory_subject.clone(),
                bus_reconnect_min,
                bus_reconnect_max,
            ))
        },
    };

    let cache: Arc<dyn SessionCache> = match RedisSessionCache::connect(
        &config.cache.url,
        config.cache.hot_msg_limit,
        config.cache.hot_ttl_min,
    )
    .await
    {
        Ok(cache) => Arc::new(cache),
        Err(err) if config.startup_strict => {
            error!(%err, url = %config.cache.url, "cache unreachable at startup (startup_strict)");
            return ExitCode::from(EXIT_STARTUP_UNAVAILABLE);
        },
        Err(err) => {
            warn!(%err, url = %config.cache.url, "cache unreachable at startup, starting degraded");
            Arc::new(LazyCache::spawn(
                config.cache.url.clone(),
                config.cache.hot_msg_limit,
                config.cache.hot_ttl_min,
                bus_reconnect_min,
                bus_reconnect_max,
            ))
        },
    };

    let auth = Arc::new(AuthVerifier::new(
        &SecretString::from(config.auth.jwt_secret.clone()),
        algorithm,
        Arc::clone(&cache),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&bus),
        Arc::clone(&cache),
        DispatcherConfig {
            request_subject: config.bus.request_subject.clone(),
            raw_memory_subject: config.bus.raw_memory_subject.clone(),
            idle_chunk_timeout: Duration::from_secs(config.timeouts.idle_chunk_timeout_secs),
            total_ticket_timeout: Duration::from_secs(config.timeouts.total_ticket_timeout_secs),
            drain_timeout: Duration::from_secs(config.timeouts.drain_timeout_secs),
        },
    ));

    let gateway = GatewayState::new(
        bus,
        cache,
        auth,
        dispatcher,
        config.server.stream_path.clone(),
        Duration::from_secs(config.timeouts.ws_keepalive_secs),
    );

    match relaygate_gateway::serve(AppState { gateway }, &config.server.bind, config.server.port).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "gateway exited with error");
            ExitCode::FAILURE
        },
    }
}
