//! Control-plane daemon entry point: loads configuration, starts the LVC and
//! GRB alert listeners, and drives the scheduler loop until a termination
//! signal arrives.

mod broker;
mod cli;
mod config;
mod skymap;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use skywatch_core::alerts::{run_listener_guarded, AlertBuffer, CancelFlag, ConstructionLock};
use skywatch_core::config::{read_host_targets, ObservatoryConfig};
use skywatch_core::grb::{parse_grb_xml, process_grb_alert, GrbOutcome};
use skywatch_core::grid::TessellationGrid;
use skywatch_core::lvc::{parse_lvc_xml, process_lvc_alert, LvcOutcome};
use skywatch_core::scheduler::{Operator, SiteParams};
use skywatch_core::store::EventStore;
use skywatch_core::telescope::{CertPaths, Telescope, TelescopeClient};
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::broker::BrokerAlertSource;
use crate::config::DaemonConfig;
use crate::skymap::HttpSkymapFetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_tracing(args.verbose);

    let mut daemon_config = DaemonConfig::from_env()?;
    if let Some(path) = args.config.clone() {
        daemon_config.observatory_config_path = path;
    }

    let observatory_config = ObservatoryConfig::load(&daemon_config.observatory_config_path)?;
    let primary = observatory_config.primary()?;
    let site = SiteParams {
        lat_rad: primary.latitude_rad(),
        lon_rad: primary.longitude_rad(),
        max_airmass: 2.0,
    };

    let cert_paths = daemon_config.cert_paths.clone();
    let mut telescope_clients = Vec::with_capacity(primary.telescopes.len());
    for entry in &primary.telescopes {
        let telescope = Telescope {
            name: entry.name.clone(),
            host: entry.ip.clone(),
            port: entry.port,
        };
        let client = build_client(telescope, args.debug, &cert_paths)?;
        telescope_clients.push((entry.name.clone(), client));
    }

    let host_targets = read_host_targets(&daemon_config.host_targets_path)?;
    let grid = Arc::new(TessellationGrid::load(&daemon_config.tessellation_path)?);
    let event_store = Arc::new(EventStore::load(daemon_config.snapshot_path.clone()).await);
    let alert_buffer = Arc::new(AlertBuffer::new());
    let wake = Arc::new(Notify::new());
    let keep_going = Arc::new(AtomicBool::new(true));

    let lvc_cancel = CancelFlag::new();
    let grb_cancel = CancelFlag::new();
    let lvc_lock = ConstructionLock::new();
    let grb_lock = ConstructionLock::new();

    let lvc_handle = daemon_config.lvc_broker_url.clone().map(|url| {
        spawn_lvc_listener(
            url,
            grid.clone(),
            alert_buffer.clone(),
            wake.clone(),
            lvc_lock.clone(),
            lvc_cancel.clone(),
        )
    });
    let grb_handle = daemon_config.grb_broker_url.clone().map(|url| {
        spawn_grb_listener(
            url,
            grid.clone(),
            alert_buffer.clone(),
            wake.clone(),
            grb_lock.clone(),
            grb_cancel.clone(),
        )
    });

    install_signal_handlers(keep_going.clone(), wake.clone());

    let mut operator = Operator::new(
        telescope_clients,
        host_targets,
        event_store,
        alert_buffer,
        site,
        wake.clone(),
    );
    operator.run(keep_going).await;

    lvc_lock.shutdown(&lvc_cancel).await;
    grb_lock.shutdown(&grb_cancel).await;
    if let Some(handle) = lvc_handle {
        let _ = handle.await;
    }
    if let Some(handle) = grb_handle {
        let _ = handle.await;
    }

    tracing::info!("scheduler shut down cleanly");
    Ok(())
}

fn build_client(telescope: Telescope, debug: bool, certs: &CertPaths) -> anyhow::Result<TelescopeClient> {
    if debug {
        Ok(TelescopeClient::insecure(telescope)?)
    } else {
        Ok(TelescopeClient::tls(telescope, certs)?)
    }
}

fn spawn_lvc_listener(
    url: String,
    grid: Arc<TessellationGrid>,
    alert_buffer: Arc<AlertBuffer>,
    wake: Arc<Notify>,
    lock: ConstructionLock,
    cancel: CancelFlag,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_listener_guarded(
            lock,
            || async move { BrokerAlertSource::new(url) },
            cancel,
            move |raw| {
                let alert = parse_lvc_xml(&raw)?;
                let now = chrono::Utc::now();
                let grid = grid.clone();
                let alert_buffer = alert_buffer.clone();
                let wake = wake.clone();
                let fetcher_url = alert.skymap_url.clone();
                tokio::spawn(async move {
                    process_one_lvc(alert, fetcher_url, &grid, &alert_buffer, &wake, now).await;
                });
                Ok(())
            },
        )
        .await;
    })
}

async fn process_one_lvc(
    alert: skywatch_core::lvc::LvcAlert,
    skymap_url: Option<String>,
    grid: &TessellationGrid,
    alert_buffer: &AlertBuffer,
    wake: &Notify,
    now: chrono::DateTime<chrono::Utc>,
) {
    let fetcher = HttpSkymapFetcher::new();
    let pixels = match (&alert.alert_type[..], skymap_url) {
        ("Retraction", _) => Vec::new(),
        (_, Some(url)) => match skywatch_core::lvc::SkymapFetcher::fetch(&fetcher, &url).await {
            Ok(pixels) => pixels,
            Err(err) => {
                tracing::error!(error = %err, grace_id = %alert.grace_id, "skymap fetch failed, dropping alert");
                return;
            }
        },
        (_, None) => {
            tracing::error!(grace_id = %alert.grace_id, "non-retraction alert missing skymap_fits");
            return;
        }
    };

    match process_lvc_alert(&alert, &pixels, grid, now) {
        LvcOutcome::Published(schedule) | LvcOutcome::Retraction(schedule) => {
            alert_buffer.publish(schedule).await;
            wake.notify_one();
        }
        LvcOutcome::Rejected(reason) => {
            tracing::info!(grace_id = %alert.grace_id, reason, "LVC alert rejected");
        }
    }
}

fn spawn_grb_listener(
    url: String,
    grid: Arc<TessellationGrid>,
    alert_buffer: Arc<AlertBuffer>,
    wake: Arc<Notify>,
    lock: ConstructionLock,
    cancel: CancelFlag,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_listener_guarded(
            lock,
            || async move { BrokerAlertSource::new(url) },
            cancel,
            move |raw| {
                let alert = parse_grb_xml(&raw)?;
                let now = chrono::Utc::now();
                match process_grb_alert(&alert, &grid, now) {
                    GrbOutcome::Published(schedule) => {
                        let alert_buffer = alert_buffer.clone();
                        let wake = wake.clone();
                        tokio::spawn(async move {
                            alert_buffer.publish(schedule).await;
                            wake.notify_one();
                        });
                    }
                    GrbOutcome::Rejected(reason) => {
                        tracing::info!(trig_id = %alert.trig_id, reason, "GRB alert rejected");
                    }
                }
                Ok(())
            },
        )
        .await;
    })
}

fn install_signal_handlers(keep_going: Arc<AtomicBool>, wake: Arc<Notify>) {
    tokio::spawn(async move {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received interrupt signal, shutting down");
            }
            _ = terminate.recv() => {
                tracing::info!("received termination signal, shutting down");
            }
        }
        keep_going.store(false, Ordering::SeqCst);
        wake.notify_one();
    });
}

fn init_tracing(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "skywatch_scheduler=info,skywatch_core=info",
        1 => "skywatch_scheduler=debug,skywatch_core=debug",
        _ => "skywatch_scheduler=trace,skywatch_core=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("SCHEDULER_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
