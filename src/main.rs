use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use sensorboard::config::{self, DashboardSettings, CONNECTION_FILE};
use sensorboard::controller::controller_handle::{next_view, ControllerHandle, ControllerSettings};
use sensorboard::controller::DashboardView;
use sensorboard::mqtt::config::MqttSettings;
use sensorboard::mqtt::identity::GuestIdentity;
use sensorboard::mqtt::mqtt_handler::MqttTransport;
use sensorboard::persistence::config_manager::ConfigManager;
use sensorboard::persistence::config_store::FileConfigStore;
use sensorboard::ui;
use tokio::sync::watch;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_dir = config::config_dir();
    let settings = DashboardSettings::load_from(&config_dir)?;
    setup_logging_env(settings.log_level());
    info!("Using configuration directory {}", config_dir.display());
    debug!("Runtime settings: {:?}", settings);

    let mqtt_settings = MqttSettings::from_dashboard(&settings).await?;

    let store = Arc::new(FileConfigStore::new(config_dir.join(CONNECTION_FILE)));
    let manager = ConfigManager::new(store);
    if let Err(e) = manager.load().await {
        warn!("{}", e);
    }

    let identity = GuestIdentity::new();
    let transport = Arc::new(MqttTransport::new(mqtt_settings, identity.clone()));
    let mut controller = ControllerHandle::spawn(
        manager.subscribe(),
        transport,
        Arc::new(identity),
        ControllerSettings {
            connect_timeout: settings.connect_timeout(),
        },
    );

    let render_task = tokio::spawn(render_views(controller.subscribe()));

    wait_for_signals(&manager).await?;

    controller
        .shutdown()
        .await
        .map_err(|e| eyre!("Failed to stop controller: {}", e))?;
    render_task.abort();
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn render_views(mut views: watch::Receiver<DashboardView>) {
    let initial = views.borrow_and_update().clone();
    print_view(&initial);

    while let Ok(view) = next_view(&mut views).await {
        print_view(&view);
    }
    debug!("Controller stopped publishing views");
}

fn print_view(view: &DashboardView) {
    for line in ui::render(view) {
        info!("{}", line);
    }
}

/// Runs until Ctrl-C. `SIGHUP` re-reads the connection configuration, which also
/// retries a failed connection.
#[cfg(unix)]
async fn wait_for_signals(manager: &ConfigManager) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Ctrl-C received, shutting down");
                return Ok(());
            }

            Some(()) = hangup.recv() => {
                info!("SIGHUP received, reloading connection configuration");
                if let Err(e) = manager.refresh().await {
                    warn!("{}", e);
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_manager: &ConfigManager) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    Ok(())
}
