//! Daemon - the EchoNet service
//!
//! Wires the store, registry, router, API server, session sweeper, and ASR
//! worker together and runs them until interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::api::{ApiServer, ApiState};
use crate::config::Config;
use crate::db::{self, SettingsStore};
use crate::discovery::MdnsAdvertiser;
use crate::forwarder::TargetForwarder;
use crate::registry::Registry;
use crate::router::{Router, RouterConfig};
use crate::state::StateManager;
use crate::transcribe::{HttpWhisperTranscriber, Transcriber};
use crate::worker::AsrWorker;
use crate::Result;

/// Expired-session sweep interval
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// The EchoNet daemon
pub struct Daemon {
    config: Arc<Config>,
    registry: Arc<Registry>,
    state: Arc<StateManager>,
}

impl Daemon {
    /// Open the database and build the core components
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated; callers
    /// should exit non-zero.
    pub fn new(config: Config) -> Result<Self> {
        let pool = db::init(&config.db_path)?;
        tracing::info!(path = %config.db_path, "database opened");

        let registry = Arc::new(Registry::new(pool.clone())?);
        let state = Arc::new(StateManager::new(Arc::new(SettingsStore::new(pool))));

        Ok(Self {
            config: Arc::new(config),
            registry,
            state,
        })
    }

    /// Run until ctrl-c
    ///
    /// # Errors
    ///
    /// Returns error on unrecoverable startup failures only
    pub async fn run(self) -> Result<()> {
        let targets = self.registry.list()?;
        if targets.is_empty() {
            tracing::info!("no targets registered yet; use POST /register");
        } else {
            for target in &targets {
                tracing::info!(
                    target_name = %target.name,
                    phrases = target.phrases.len(),
                    "loaded registered target"
                );
            }
        }

        // Seed the configured startup mode (logged like any other change)
        if self.state.listen_mode()? != self.config.initial_listen_mode {
            self.state.set_listen_mode(
                self.config.initial_listen_mode,
                "startup",
                Some("configured default mode"),
            )?;
        }
        tracing::info!(mode = %self.state.listen_mode()?, "initial listen mode");

        let forwarder = TargetForwarder::new(self.config.http_timeout_s)?;
        let router = Arc::new(Router::new(
            Arc::clone(&self.registry),
            forwarder,
            RouterConfig {
                cancel_phrases: self.config.cancel_phrases.clone(),
                session_ttl_seconds: self.config.session_ttl_seconds,
                strip_trigger: self.config.forward_strip_trigger,
            },
        ));

        let transcriber: Arc<dyn Transcriber> =
            Arc::new(HttpWhisperTranscriber::new(&self.config.whisper)?);

        // mDNS advertisement (optional, best-effort)
        let advertiser = if self.config.discovery.enabled {
            match MdnsAdvertiser::new() {
                Ok(advertiser) => {
                    if let Err(e) = advertiser.start(&self.config.discovery, self.config.port) {
                        tracing::warn!(error = %e, "mDNS advertisement failed");
                    }
                    Some(advertiser)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "mDNS unavailable");
                    None
                }
            }
        } else {
            None
        };

        // Background sweep of expired sessions
        let sweep_router = Arc::clone(&router);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                let removed = sweep_router.sessions().sweep(now_ms);
                if removed > 0 {
                    tracing::debug!(removed, "swept expired sessions");
                }
            }
        });

        // HTTP API
        let api_state = Arc::new(ApiState {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            state: Arc::clone(&self.state),
            router: Arc::clone(&router),
            transcriber: Arc::clone(&transcriber),
        });
        let _api_handle = ApiServer::new(
            api_state,
            self.config.host.clone(),
            self.config.port,
        )
        .spawn();

        // ASR worker
        let stop = Arc::new(AtomicBool::new(false));
        let worker = AsrWorker::new(
            Arc::clone(&self.state),
            Arc::clone(&router),
            Arc::new(crate::audio::CpalCapture),
            transcriber,
            self.config.audio.clone(),
            self.config.source_id.clone(),
            self.config.room.clone(),
            Arc::clone(&stop),
        );
        let worker_handle = tokio::spawn(worker.run());

        // Shutdown signal
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        shutdown_rx.recv().await;
        tracing::info!("shutdown requested");

        stop.store(true, Ordering::Relaxed);
        if let Some(advertiser) = &advertiser {
            advertiser.stop();
        }
        let _ = worker_handle.await;

        tracing::info!("daemon stopped");
        Ok(())
    }
}
