use log::{error, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::binance::catalog::InstrumentCatalog;
use crate::api::binance::ws::{StreamConfig, StreamSession};
use crate::error::SpikeWatchError;
use crate::monitor::evaluator;
use crate::sink::AlertSink;
use crate::types::{BarUpdate, Timeframe};

/// Handle to the background task of one monitoring session.
struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Cancel the session and wait for its task to wind down.
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                warn!("session task ended abnormally: {}", err);
            }
        }
    }
}

/// Top-level orchestration. Owns at most one live session at a time;
/// `start` tears any prior session fully down before subscribing again, so
/// the same bar can never alert twice.
pub struct Monitor {
    catalog: InstrumentCatalog,
    stream_config: StreamConfig,
    sink: AlertSink,
    session: Option<SessionHandle>,
}

impl Monitor {
    pub fn new(sink: AlertSink) -> Self {
        Self::with_endpoints(InstrumentCatalog::default(), StreamConfig::default(), sink)
    }

    /// Endpoint override used by tests and alternative deployments.
    pub fn with_endpoints(
        catalog: InstrumentCatalog,
        stream_config: StreamConfig,
        sink: AlertSink,
    ) -> Self {
        Self {
            catalog,
            stream_config,
            sink,
            session: None,
        }
    }

    /// Begin monitoring with the given threshold and timeframe, both
    /// captured by value for the session's lifetime. Returns as soon as the
    /// background task is spawned; catalog resolution and the handshake
    /// happen inside it, so the caller is never blocked on the network.
    pub async fn start(
        &mut self,
        threshold: f64,
        timeframe: Timeframe,
    ) -> Result<(), SpikeWatchError> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(SpikeWatchError::InvalidThreshold(threshold));
        }

        if let Some(previous) = self.session.take() {
            self.sink.line("Restarting monitoring");
            previous.shutdown().await;
        }

        self.sink.line(format!(
            "Starting monitor: threshold {}%, timeframe {}",
            threshold, timeframe
        ));

        let catalog = self.catalog.clone();
        let stream_config = self.stream_config.clone();
        let sink = self.sink.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            run_session(catalog, stream_config, threshold, timeframe, sink, task_cancel).await;
        });

        self.session = Some(SessionHandle { cancel, task });
        Ok(())
    }

    /// Stop the active session, if any. Prompt even while the session is
    /// blocked on a receive or sitting out the reconnect backoff.
    pub async fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown().await;
            self.sink.line("Monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .map_or(false, |session| !session.task.is_finished())
    }
}

async fn run_session(
    catalog: InstrumentCatalog,
    stream_config: StreamConfig,
    threshold: f64,
    timeframe: Timeframe,
    sink: AlertSink,
    cancel: CancellationToken,
) {
    let instruments = tokio::select! {
        _ = cancel.cancelled() => return,
        resolved = catalog.resolve() => match resolved {
            Ok(instruments) => instruments,
            Err(err) => {
                error!("catalog resolution failed: {}", err);
                sink.line(format!("Monitoring not started: {}", err));
                return;
            }
        },
    };

    sink.line(format!(
        "Tracking {} USDT perpetual futures pairs",
        instruments.len()
    ));

    let bar_sink = sink.clone();
    let on_bar = move |bar: BarUpdate| match evaluator::evaluate(&bar, threshold) {
        Ok(Some(alert)) => bar_sink.line(alert.to_string()),
        Ok(None) => {}
        Err(err) => {
            warn!("evaluation failed: {}", err);
            bar_sink.line(format!("Evaluation error: {}", err));
        }
    };

    let mut session = StreamSession::new(stream_config);
    if let Err(err) = session
        .run(&instruments, timeframe, on_bar, &sink, &cancel)
        .await
    {
        // Already reported through the sink by the session itself.
        error!("session ended: {}", err);
    }
}
