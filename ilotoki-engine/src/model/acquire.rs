//! Model acquisition state machine
//!
//! ```text
//! Idle ──> Downloading ──> Loading ──> Ready
//!              │              │
//!              └──> Failed <──┘ ──(wipe directory, retry once)──> Downloading
//! ```
//!
//! The acquirer is the only writer of [`AcquisitionState`]; everybody else
//! observes snapshots through a `watch` channel.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use super::error::{AcquireError, LoadError, report};
use super::fetch::{Fetcher, ProgressEvent};
use super::model_config::ModelAsset;
use super::session::{InferenceParams, ModelLoader};
use super::store::ModelStore;

type Result<T> = std::result::Result<T, AcquireError>;

/// Where the model is in its lifecycle.
pub enum AcquisitionState<S> {
    Idle,
    Downloading(ProgressEvent),
    Loading,
    Ready(Arc<S>),
    Failed {
        message: String,
        /// An automatic retry follows this failure
        retrying: bool,
    },
}

/// [`AcquisitionState`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Downloading,
    Loading,
    Ready,
    Failed,
}

impl<S> AcquisitionState<S> {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Downloading(_) => Phase::Downloading,
            Self::Loading => Phase::Loading,
            Self::Ready(_) => Phase::Ready,
            Self::Failed { .. } => Phase::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn session(&self) -> Option<&Arc<S>> {
        match self {
            Self::Ready(session) => Some(session),
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<&ProgressEvent> {
        match self {
            Self::Downloading(progress) => Some(progress),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// One-line status for display next to the progress bar.
    pub fn status_line(&self) -> String {
        match self {
            Self::Idle => "Preparing...".to_string(),
            Self::Downloading(_) => "Downloading model…".to_string(),
            Self::Loading => "Loading model into memory…".to_string(),
            Self::Ready(_) => "Model ready".to_string(),
            Self::Failed {
                message,
                retrying: true,
            } => format!("Error: {}. Retrying...", message),
            Self::Failed {
                message,
                retrying: false,
            } => format!("Retry download error: {}", message),
        }
    }
}

impl<S> Clone for AcquisitionState<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::Downloading(progress) => Self::Downloading(*progress),
            Self::Loading => Self::Loading,
            Self::Ready(session) => Self::Ready(Arc::clone(session)),
            Self::Failed { message, retrying } => Self::Failed {
                message: message.clone(),
                retrying: *retrying,
            },
        }
    }
}

impl<S> fmt::Debug for AcquisitionState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Downloading(progress) => f.debug_tuple("Downloading").field(progress).finish(),
            Self::Loading => f.write_str("Loading"),
            Self::Ready(_) => f.write_str("Ready"),
            Self::Failed { message, retrying } => f
                .debug_struct("Failed")
                .field("message", message)
                .field("retrying", retrying)
                .finish(),
        }
    }
}

/// Downloads, loads and owns the single model session of this device.
pub struct ModelAcquirer<L: ModelLoader> {
    asset: ModelAsset,
    store: ModelStore,
    fetcher: Fetcher,
    loader: Arc<L>,
    params: InferenceParams,
    state: watch::Sender<AcquisitionState<L::Session>>,
    /// Held for the whole of an acquisition run
    gate: Mutex<()>,
    /// Bumped by `release`; a run only publishes while this is unchanged
    epoch: AtomicU64,
}

impl<L: ModelLoader> ModelAcquirer<L> {
    pub fn new(asset: ModelAsset, store: ModelStore, loader: L, params: InferenceParams) -> Self {
        let (state, _) = watch::channel(AcquisitionState::Idle);
        Self {
            asset,
            store,
            fetcher: Fetcher::new(),
            loader: Arc::new(loader),
            params,
            state,
            gate: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn asset(&self) -> &ModelAsset {
        &self.asset
    }

    pub fn model_path(&self) -> std::path::PathBuf {
        self.store.path_for(&self.asset)
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<AcquisitionState<L::Session>> {
        self.state.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> AcquisitionState<L::Session> {
        self.state.borrow().clone()
    }

    /// The loaded session, if the model is ready.
    pub fn session(&self) -> Option<Arc<L::Session>> {
        self.state.borrow().session().cloned()
    }

    /// Download (unless already on disk) and load the model.
    ///
    /// A failure wipes the model directory and triggers exactly one retry; a
    /// second failure leaves the state at terminal `Failed` and is returned.
    /// Fails with [`AcquireError::InProgress`] while another run is active.
    /// Dropping the future cancels the run and returns the state to `Idle`.
    pub async fn acquire(&self) -> Result<Arc<L::Session>> {
        self.run(false).await
    }

    /// Manual retry after a terminal failure: wipe the directory, then acquire.
    pub async fn retry(&self) -> Result<Arc<L::Session>> {
        self.run(true).await
    }

    /// Drop the session and return to `Idle`.
    ///
    /// The model is freed once in-flight translations holding the session finish.
    /// A run still in flight stops publishing and ends with
    /// [`AcquireError::Released`] instead of becoming `Ready`.
    pub fn release(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = self.state.send_replace(AcquisitionState::Idle);
        if previous.is_ready() {
            info!("Model session released");
        }
    }

    async fn run(&self, wipe_first: bool) -> Result<Arc<L::Session>> {
        let Ok(_gate) = self.gate.try_lock() else {
            return Err(AcquireError::InProgress);
        };
        if let Some(session) = self.session() {
            return Ok(session);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut cancel = CancelGuard::new(&self.state);
        let first = if wipe_first {
            match self.cleanup().await {
                Ok(()) => self.attempt(epoch).await,
                Err(e) => Err(e),
            }
        } else {
            self.attempt(epoch).await
        };

        let result = match first {
            Ok(session) => Ok(session),
            Err(first) if !self.is_current(epoch) => Err(first),
            Err(first) => {
                let message = report(&first);
                warn!("Model acquisition failed: {}. Retrying...", message);
                self.publish(
                    epoch,
                    AcquisitionState::Failed {
                        message,
                        retrying: true,
                    },
                );
                match self.cleanup().await {
                    Ok(()) => self.attempt(epoch).await,
                    Err(e) => Err(e),
                }
            }
        };
        cancel.disarm();

        if !self.is_current(epoch) {
            info!("Model released during acquisition, discarding the result");
            return Err(AcquireError::Released);
        }
        match result {
            Ok(session) => {
                if !self.publish(epoch, AcquisitionState::Ready(Arc::clone(&session))) {
                    return Err(AcquireError::Released);
                }
                info!("Model ready: {}", self.asset.id);
                Ok(session)
            }
            Err(e) => {
                let message = report(&e);
                error!("Model acquisition failed after retry: {}", message);
                self.publish(
                    epoch,
                    AcquisitionState::Failed {
                        message,
                        retrying: false,
                    },
                );
                Err(e)
            }
        }
    }

    /// One pass of download + load.
    async fn attempt(&self, epoch: u64) -> Result<Arc<L::Session>> {
        let path = self.model_path();
        self.store
            .ensure_directory()
            .await
            .map_err(|source| AcquireError::Store {
                path: self.store.dir().to_path_buf(),
                source,
            })?;

        if self.store.exists(&path).await {
            info!("Model already on disk at {:?}", path);
        } else {
            self.publish(epoch, AcquisitionState::Downloading(ProgressEvent::default()));
            let mut progress = pin!(self.fetcher.fetch(&self.asset.url, &path));
            while let Some(event) = progress.next().await {
                let event = event?;
                if let Some(percent) = event.percent() {
                    debug!("Download progress: {}%", percent);
                }
                self.publish(epoch, AcquisitionState::Downloading(event));
            }
        }

        self.publish(epoch, AcquisitionState::Loading);
        let session = self.load(path).await?;
        Ok(Arc::new(session))
    }

    async fn load(&self, path: std::path::PathBuf) -> std::result::Result<L::Session, LoadError> {
        let loader = Arc::clone(&self.loader);
        let params = self.params.clone();
        tokio::task::spawn_blocking(move || loader.load(&path, &params))
            .await
            .map_err(|e| LoadError::Model(e.into()))?
    }

    /// Remove the whole model directory; a half-written state is never reused.
    async fn cleanup(&self) -> Result<()> {
        self.store
            .delete()
            .await
            .map_err(|source| AcquireError::Store {
                path: self.store.dir().to_path_buf(),
                source,
            })
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Store `state` unless the acquirer was released since `epoch`.
    fn publish(&self, epoch: u64, state: AcquisitionState<L::Session>) -> bool {
        // Checked under the channel lock so it cannot interleave with `release`
        self.state.send_if_modified(|current| {
            if !self.is_current(epoch) {
                return false;
            }
            *current = state;
            true
        })
    }
}

/// Puts the state back to `Idle` if an acquisition future is dropped mid-run.
struct CancelGuard<'a, S> {
    state: &'a watch::Sender<AcquisitionState<S>>,
    armed: bool,
}

impl<'a, S> CancelGuard<'a, S> {
    fn new(state: &'a watch::Sender<AcquisitionState<S>>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S> Drop for CancelGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Model acquisition cancelled");
            self.state.send_replace(AcquisitionState::Idle);
        }
    }
}
