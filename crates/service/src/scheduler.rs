use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use bidbroker_core::config::SweeperConfig;
use bidbroker_store::BrokerStore;

use crate::broker::BrokerService;

/// Background task that runs [`BrokerService::sweep_expirations`] on a fixed interval.
pub struct SweepScheduler {
    stop_signal: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl SweepScheduler {
    pub fn spawn<S>(service: Arc<BrokerService<S>>, interval: Duration) -> Self
    where
        S: BrokerStore + 'static,
    {
        let (stop_signal, mut stop_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                event_name = "system.sweeper.started",
                correlation_id = "bootstrap",
                interval_secs = interval.as_secs(),
                "expiry sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = service.now();
                        match service.sweep_expirations(now).await {
                            Ok(expired) => debug!(
                                event_name = "system.sweeper.tick",
                                quotes_expired = expired,
                                "expiry sweep tick finished"
                            ),
                            Err(error) => warn!(
                                event_name = "system.sweeper.error",
                                error_code = error.code(),
                                error = %error,
                                "expiry sweep tick failed"
                            ),
                        }
                    }
                    _ = stop_rx.recv() => break,
                }
            }

            info!(
                event_name = "system.sweeper.stopped",
                correlation_id = "shutdown",
                "expiry sweeper stopped"
            );
        });

        Self { stop_signal, handle }
    }

    /// Spawns a scheduler unless the sweeper is disabled.
    pub fn from_config<S>(service: Arc<BrokerService<S>>, config: &SweeperConfig) -> Option<Self>
    where
        S: BrokerStore + 'static,
    {
        config
            .enabled
            .then(|| Self::spawn(service, Duration::from_secs(config.interval_secs)))
    }

    /// Signals the loop to stop and waits for the in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.stop_signal.send(());
        if let Err(error) = self.handle.await {
            warn!(
                event_name = "system.sweeper.join_failed",
                correlation_id = "shutdown",
                error = %error,
                "expiry sweeper task ended abnormally"
            );
        }
    }
}
