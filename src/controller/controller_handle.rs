//! Controller Handle - task wrapper around the subscription controller
//!
//! Spawns the single task that owns the [`SubscriptionController`] and feeds it
//! configuration snapshots, connect outcomes and stream events in arrival order.
//!

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::attempt::ConnectionAttempt;
use super::subscription::{AttemptId, ConnectRequest, SubscriptionController};
use super::DashboardView;
use crate::mqtt::transport::{
    IdentityBootstrap, StreamEvent, Subscription, Transport, TransportError,
};
use crate::persistence::config_manager::ConfigSnapshot;

/// Settings for the controller task
#[derive(Clone, Debug, Default)]
pub struct ControllerSettings {
    /// Upper bound for connect + subscribe of one attempt
    ///
    /// `None` waits for the transport indefinitely. A timed out attempt ends in the
    /// error state like any other connect failure.
    pub connect_timeout: Option<Duration>,
}

/// Errors reported by the controller handle
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The controller task is gone and no further views will be published
    #[error("Controller task has stopped")]
    ChannelClosed,

    /// The controller task panicked or was cancelled
    #[error("Controller task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

type ConnectOutcome = (AttemptId, Result<Subscription, TransportError>);

/// Handle to the running controller task
///
/// Dropping the handle stops the task the same way [`ControllerHandle::shutdown`] does,
/// without waiting for it.
pub struct ControllerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    view_rx: watch::Receiver<DashboardView>,
}

impl ControllerHandle {
    /// Spawns the controller task
    ///
    /// The task applies the current configuration snapshot immediately and then reacts
    /// to every change published on `config_rx`.
    ///
    /// # Arguments
    ///
    /// * `config_rx` - Configuration state published by the config manager
    /// * `transport` - Capability used to connect and subscribe
    /// * `identity` - Bootstrap run before every connect attempt
    /// * `settings` - Controller settings
    pub fn spawn(
        config_rx: watch::Receiver<ConfigSnapshot>,
        transport: Arc<dyn Transport>,
        identity: Arc<dyn IdentityBootstrap>,
        settings: ControllerSettings,
    ) -> Self {
        info!("Starting subscription controller with settings: {:?}", settings);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (view_tx, view_rx) = watch::channel(DashboardView::default());

        let driver = Driver {
            controller: SubscriptionController::new(),
            transport,
            identity,
            settings,
            connects: JoinSet::new(),
            events: None,
            view_tx,
        };
        let task = tokio::spawn(driver.run(config_rx, shutdown_rx));

        Self {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            view_rx,
        }
    }

    /// Latest published view
    pub fn view(&self) -> DashboardView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view_rx.clone()
    }

    /// Stops the controller and waits for it to release its subscription
    ///
    /// Calling it again after a successful shutdown does nothing.
    pub async fn shutdown(&mut self) -> Result<(), ControllerError> {
        let Some(task) = self.task.take() else {
            debug!("Controller already shut down");
            return Ok(());
        };

        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Controller task ended before shutdown was requested");
            }
        }
        task.await?;
        info!("Controller shut down");
        Ok(())
    }
}

/// Waits for the next view published after the one last seen through `view_rx`.
pub async fn next_view(
    view_rx: &mut watch::Receiver<DashboardView>,
) -> Result<DashboardView, ControllerError> {
    view_rx
        .changed()
        .await
        .map_err(|_| ControllerError::ChannelClosed)?;
    Ok(view_rx.borrow_and_update().clone())
}

struct Driver {
    controller: SubscriptionController,
    transport: Arc<dyn Transport>,
    identity: Arc<dyn IdentityBootstrap>,
    settings: ControllerSettings,
    connects: JoinSet<ConnectOutcome>,
    /// Event stream of the live subscription
    events: Option<(AttemptId, mpsc::Receiver<StreamEvent>)>,
    view_tx: watch::Sender<DashboardView>,
}

impl Driver {
    async fn run(
        mut self,
        mut config_rx: watch::Receiver<ConfigSnapshot>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let initial = config_rx.borrow_and_update().clone();
        self.apply_config(&initial);
        self.publish();

        let mut watching_config = true;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Shutdown requested");
                    break;
                }

                changed = config_rx.changed(), if watching_config => match changed {
                    Ok(()) => {
                        let snapshot = config_rx.borrow_and_update().clone();
                        self.apply_config(&snapshot);
                    }
                    Err(_) => {
                        warn!("Configuration source closed, keeping current subscription");
                        watching_config = false;
                    }
                },

                Some(joined) = self.connects.join_next(), if !self.connects.is_empty() => match joined {
                    Ok((attempt, Ok(subscription))) => {
                        let Subscription { handle, events } = subscription;
                        if self.controller.on_connected(attempt, handle) {
                            self.events = Some((attempt, events));
                        }
                    }
                    Ok((attempt, Err(e))) => self.controller.on_connect_failed(attempt, e.to_string()),
                    Err(e) => error!("Connect task failed: {}", e),
                },

                (attempt, event) = next_stream_event(&mut self.events) => {
                    self.controller.on_stream_event(attempt, event, Local::now());
                }
            }

            self.drop_dead_stream();
            self.publish();
        }

        self.controller.shutdown();
        self.connects.abort_all();
        self.events = None;
        self.publish();
    }

    fn apply_config(&mut self, snapshot: &ConfigSnapshot) {
        if let Some(request) = self.controller.on_config(snapshot) {
            self.start_attempt(request);
        }
        self.drop_dead_stream();
    }

    fn start_attempt(&mut self, request: ConnectRequest) {
        let pending = ConnectionAttempt::create(request, Arc::clone(&self.transport))
            .bootstrap(self.identity.as_ref());
        let attempt = pending.attempt();
        let timeout = self.settings.connect_timeout;
        self.connects
            .spawn(async move { (attempt, pending.establish(timeout).await) });
    }

    fn drop_dead_stream(&mut self) {
        if let Some((attempt, _)) = &self.events {
            if !self.controller.is_live(*attempt) {
                self.events = None;
            }
        }
    }

    fn publish(&self) {
        let view = self.controller.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

// pends forever while there is no live stream; a closed stream counts as completion
async fn next_stream_event(
    events: &mut Option<(AttemptId, mpsc::Receiver<StreamEvent>)>,
) -> (AttemptId, StreamEvent) {
    match events {
        Some((attempt, rx)) => (*attempt, rx.recv().await.unwrap_or(StreamEvent::Complete)),
        None => std::future::pending().await,
    }
}
