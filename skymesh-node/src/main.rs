//! skymesh: ADS-B receiver, aircraft tracker and mesh alert daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use skymesh_alert::crypto::ChannelKey;
use skymesh_alert::iface::{Interface, Transport};
use skymesh_alert::mqtt::{MqttConfig, MqttTransport};
use skymesh_alert::outbound::RetryPolicy;
use skymesh_alert::serial::SerialTransport;
use skymesh_alert::throttle::ThrottleConfig;
use skymesh_alert::{Dispatcher, DispatcherConfig, MessageTemplate, Router};
use skymesh_core::{decode, parse_hex_uncached, Tracker, TrackerConfig};

mod config;
mod control;
mod pipeline;
mod sources;
mod web;

use config::Config;

/// Hard deadline for orderly shutdown; after this the process exits
/// regardless of what tasks are still doing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "skymesh", version, about = "ADS-B receiver and mesh alerter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the receiver daemon
    Run {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "skymesh.toml")]
        config: PathBuf,
    },

    /// Decode hex frames from a file and print an aircraft table
    Decode {
        /// File containing hex frames (one per line, plain or AVR)
        file: PathBuf,

        /// Receiver latitude, enables local CPR decode
        #[arg(long, requires = "lon")]
        lat: Option<f64>,

        /// Receiver longitude
        #[arg(long, requires = "lat")]
        lon: Option<f64>,
    },

    /// Validate a config file and print a summary
    CheckConfig {
        #[arg(short, long, default_value = "skymesh.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Run { config } => run_daemon(&config).await,
        Commands::Decode { file, lat, lon } => decode_file(&file, lat.zip(lon)),
        Commands::CheckConfig { config } => check_config(&config),
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

async fn run_daemon(config_path: &PathBuf) -> Result<(), String> {
    let cfg = Config::load(config_path).map_err(|e| e.to_string())?;
    info!(config = %config_path.display(), sources = cfg.sources.len(), "starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Sources and pipeline.
    let (source_rx, source_manager) = sources::spawn_sources(&cfg.sources, shutdown_rx.clone());
    let watchlist = cfg.build_watchlist().map_err(|e| e.to_string())?;
    let mut pipeline =
        pipeline::spawn_pipeline(source_rx, cfg.tracker_config(), watchlist);

    // Dispatcher, when any outbound interface is configured.
    let dispatch_view = match build_dispatcher(&cfg)? {
        Some(dispatcher) => {
            let view = dispatcher.subscribe_view();
            let alerts = std::mem::replace(&mut pipeline.alerts, tokio::sync::mpsc::channel(1).1);
            tokio::spawn(dispatcher.run(alerts, shutdown_rx.clone()));
            Some(view)
        }
        None => {
            warn!("no outbound interface configured; alerts will only be logged");
            let mut alerts =
                std::mem::replace(&mut pipeline.alerts, tokio::sync::mpsc::channel(1).1);
            tokio::spawn(async move {
                while let Some(event) = alerts.recv().await {
                    info!(
                        icao = %event.aircraft.icao,
                        reason = %event.matched.reason,
                        "watchlist match"
                    );
                }
            });
            None
        }
    };

    // HTTP read views.
    if cfg.http.enabled {
        let state = Arc::new(web::AppState {
            tracker: pipeline.tracker.clone(),
            sources: source_manager.statuses.clone(),
            decode_stats: pipeline.decode_stats.clone(),
            dispatch_view,
            started_at: sources::unix_now(),
        });
        let router = web::build_router(state, cfg.http.cors_origin.clone());
        let listener = tokio::net::TcpListener::bind(&cfg.http.bind)
            .await
            .map_err(|e| format!("http bind {}: {e}", cfg.http.bind))?;
        info!(bind = %cfg.http.bind, "http listening");

        let mut http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown.wait_for(|v| *v).await;
                })
                .await;
        });
    }

    // Control channel.
    if cfg.control.enabled {
        tokio::spawn(control::run_control(
            cfg.control.bind.clone(),
            pipeline.tracker.clone(),
            shutdown_rx.clone(),
        ));
    }

    // Run until interrupted.
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, shutting down"),
        Err(e) => warn!(error = %e, "signal handler failed, shutting down"),
    }

    // Dump final counters while the tracker task is still up, then
    // signal shutdown and give tasks a bounded grace period.
    let tracker_stats = pipeline.tracker.stats().await;
    let decode_stats = pipeline.decode_stats.lock().unwrap().clone();
    let _ = shutdown_tx.send(true);
    info!(
        frames = decode_stats.frames_in,
        crc_pass = decode_stats.crc_pass,
        crc_fail = decode_stats.crc_fail,
        messages = tracker_stats.messages,
        aircraft_seen = tracker_stats.new_aircraft,
        cpr_global = tracker_stats.cpr_global,
        cpr_local = tracker_stats.cpr_local,
        "final counters"
    );

    let drain = async {
        for task in pipeline.tasks {
            let _ = task.await;
        }
        for task in source_manager.tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("shutdown grace expired, exiting anyway");
    }

    Ok(())
}

fn build_dispatcher(cfg: &Config) -> Result<Option<Dispatcher>, String> {
    let d = &cfg.dispatch;
    let psk = match &d.psk {
        Some(encoded) => Some(ChannelKey::from_base64(encoded).map_err(|e| e.to_string())?),
        None => None,
    };

    let mut interfaces = Vec::new();
    if let Some(m) = &d.mqtt {
        let transport = MqttTransport::new(MqttConfig {
            broker_host: m.broker_host.clone(),
            broker_port: m.broker_port,
            client_id: cfg.receiver.name.clone(),
            username: m.username.clone(),
            password: m.password.clone(),
            tls: m.tls,
            topic_prefix: m.topic_prefix.clone(),
            region: m.region.clone(),
            qos: m.qos,
            keepalive_secs: m.keepalive_sec,
        });
        interfaces.push(Interface::new("mqtt", Transport::Mqtt(transport)));
    }
    if let Some(s) = &d.serial {
        let transport = SerialTransport::new(&s.port, d.channel_number, psk.is_some());
        interfaces.push(Interface::new("serial", Transport::Serial(transport)));
    }

    if interfaces.is_empty() {
        return Ok(None);
    }

    let router = Router::new(
        interfaces,
        d.routing,
        d.failover_timeout_sec,
        d.health_check_interval_sec,
    );

    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            channel: d.channel.clone(),
            psk,
            template: MessageTemplate::new(
                &d.message_format,
                d.coordinate_format,
                d.max_message_length,
            ),
            throttle: ThrottleConfig {
                min_interval_sec: cfg.watchlist.min_interval_sec,
                max_alerts_per_hour: cfg.watchlist.max_alerts_per_hour,
            },
            retry: RetryPolicy {
                max_attempts: d.max_attempts,
                message_ttl: d.message_ttl_sec,
                ..RetryPolicy::default()
            },
            log_path: d.alert_log.clone(),
        },
        router,
    )
    .map_err(|e| e.to_string())?;

    Ok(Some(dispatcher))
}

// ---------------------------------------------------------------------------
// Offline decode
// ---------------------------------------------------------------------------

fn decode_file(path: &PathBuf, reference: Option<(f64, f64)>) -> Result<(), String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;

    let mut tracker = Tracker::new(TrackerConfig {
        reference,
        ..TrackerConfig::default()
    });

    let mut total = 0u64;
    let mut parsed = 0u64;
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let hex = line
            .strip_prefix('*')
            .and_then(|rest| rest.strip_suffix(';'))
            .unwrap_or(line);

        total += 1;
        // Synthetic 1ms spacing keeps CPR pairing deterministic.
        let ts = i as f64 * 0.001;
        if let Some(frame) = parse_hex_uncached(hex, ts) {
            parsed += 1;
            for msg in decode(&frame) {
                tracker.ingest(&msg);
            }
        }
    }

    let mut table = Table::new();
    table.set_header(vec![
        "ICAO", "CALLSIGN", "SQUAWK", "LAT", "LON", "ALT ft", "GS kt", "TRK", "MSGS",
    ]);
    for ac in tracker.snapshot() {
        table.add_row(vec![
            Cell::new(ac.icao.to_string()),
            Cell::new(ac.callsign.as_deref().unwrap_or("-")),
            Cell::new(ac.squawk.as_deref().unwrap_or("-")),
            Cell::new(opt_num(ac.lat, 5)),
            Cell::new(opt_num(ac.lon, 5)),
            Cell::new(
                ac.alt_baro_ft
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".into()),
            ),
            Cell::new(opt_num(ac.ground_speed_kts, 0)),
            Cell::new(opt_num(ac.track_deg, 0)),
            Cell::new(ac.messages_total.to_string()),
        ]);
    }

    println!("{table}");
    println!(
        "{total} frames, {parsed} valid, {} aircraft, {} positions",
        tracker.len(),
        tracker.stats.cpr_global + tracker.stats.cpr_local + tracker.stats.cpr_surface,
    );
    Ok(())
}

fn opt_num(v: Option<f64>, decimals: usize) -> String {
    v.map(|x| format!("{x:.decimals$}")).unwrap_or_else(|| "-".into())
}

// ---------------------------------------------------------------------------
// Config check
// ---------------------------------------------------------------------------

fn check_config(path: &PathBuf) -> Result<(), String> {
    let cfg = Config::load(path).map_err(|e| e.to_string())?;

    println!("config ok: {}", path.display());
    println!("  receiver: {}", cfg.receiver.name);
    match (cfg.receiver.lat, cfg.receiver.lon) {
        (Some(lat), Some(lon)) => println!("  reference: {lat:.5}, {lon:.5}"),
        _ => println!("  reference: none (local CPR decode disabled until first global fix)"),
    }
    println!("  sources: {}", cfg.sources.len());
    for s in &cfg.sources {
        println!("    {} ({:?}) {}", s.name, s.kind, s.address);
    }
    println!("  watchlist entries: {}", cfg.watchlist.entries.len());
    println!(
        "  outbound: serial={} mqtt={} routing={:?}",
        cfg.dispatch.serial.is_some(),
        cfg.dispatch.mqtt.is_some(),
        cfg.dispatch.routing,
    );
    Ok(())
}
