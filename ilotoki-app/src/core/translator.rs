//! Translator view model
//!
//! Owns the model acquirer and the translation form (query, direction,
//! language, result). All methods take `&self` so one instance can be shared
//! between a UI thread and background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use ilotoki_engine::model::{
    AcquisitionState, LlamaLoader, ModelAcquirer, ModelAsset, ModelLoader, ModelStore, report,
};
use ilotoki_engine::{
    Language, OutputNormalization, TranslationRequest, TranslationResult, receive_into,
    spawn_translation,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Settings;

#[derive(Debug, thiserror::Error)]
pub enum TranslatorError {
    #[error("a translation is already running")]
    Busy,
}

/// What the user has typed and selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub query: String,
    pub from_toki_pona: bool,
    pub language: Language,
}

impl Form {
    pub fn request(&self) -> TranslationRequest {
        TranslationRequest::with_language(&self.query, self.from_toki_pona, self.language)
    }
}

pub struct Translator<L: ModelLoader = LlamaLoader> {
    acquirer: Arc<ModelAcquirer<L>>,
    normalization: OutputNormalization,
    form: Mutex<Form>,
    result: Mutex<TranslationResult>,
    busy: AtomicBool,
    background: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Translator<LlamaLoader> {
    /// Translator backed by llama.cpp, configured from `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::with_loader(
            settings.model_asset()?,
            settings.model_store()?,
            LlamaLoader,
            settings,
        )
    }
}

impl<L: ModelLoader> Translator<L> {
    pub fn with_loader(
        asset: ModelAsset,
        store: ModelStore,
        loader: L,
        settings: &Settings,
    ) -> Result<Self> {
        let acquirer = ModelAcquirer::new(asset, store, loader, settings.inference_params())
            .with_fetcher(settings.fetcher()?);
        Ok(Self {
            acquirer: Arc::new(acquirer),
            normalization: settings.normalization(),
            form: Mutex::new(Form {
                query: String::new(),
                from_toki_pona: settings.translation.from_toki_pona,
                language: settings.translation.language,
            }),
            result: Mutex::new(TranslationResult::new()),
            busy: AtomicBool::new(false),
            background: Mutex::new(None),
        })
    }

    pub fn acquirer(&self) -> &ModelAcquirer<L> {
        &self.acquirer
    }

    pub fn state(&self) -> AcquisitionState<L::Session> {
        self.acquirer.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<AcquisitionState<L::Session>> {
        self.acquirer.subscribe()
    }

    pub fn status_line(&self) -> String {
        self.acquirer.state().status_line()
    }

    /// Begin acquiring the model in the background.
    ///
    /// Returns `false`, and does nothing, while an earlier acquisition is
    /// still running. Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        self.spawn_acquisition(false)
    }

    /// Wipe the model directory and acquire again, after a terminal failure.
    /// Returns `false` while an earlier acquisition is still running.
    pub fn retry(&self) -> bool {
        self.spawn_acquisition(true)
    }

    fn spawn_acquisition(&self, wipe_first: bool) -> bool {
        let mut background = lock(&self.background);
        if background.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Acquisition already running");
            return false;
        }

        let acquirer = Arc::clone(&self.acquirer);
        *background = Some(tokio::spawn(async move {
            let result = if wipe_first {
                acquirer.retry().await
            } else {
                acquirer.acquire().await
            };
            if let Err(e) = result {
                debug!("Background acquisition ended: {}", report(&e));
            }
        }));
        true
    }

    /// Wait for the background acquisition started by [`Self::start`] or
    /// [`Self::retry`] to settle, and return the session if it succeeded.
    pub async fn wait_ready(&self) -> Option<Arc<L::Session>> {
        let task = lock(&self.background).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            if e.is_panic() {
                error!("Model acquisition task panicked: {}", e);
            } else {
                debug!("Model acquisition task cancelled");
            }
        }
        self.acquirer.session()
    }

    pub fn form(&self) -> Form {
        lock(&self.form).clone()
    }

    pub fn set_query(&self, query: impl Into<String>) {
        lock(&self.form).query = query.into();
    }

    pub fn select_language(&self, language: Language) {
        lock(&self.form).language = language;
    }

    /// Flip the direction. A non-empty result becomes the new query.
    pub fn swap_direction(&self) {
        let mut form = lock(&self.form);
        let mut result = lock(&self.result);
        form.from_toki_pona = !form.from_toki_pona;
        if !result.is_empty() {
            form.query = result.text().to_string();
            result.clear();
        }
    }

    pub fn result(&self) -> TranslationResult {
        lock(&self.result).clone()
    }

    /// Translate the current query into the (cleared) result.
    ///
    /// `on_fragment` sees each piece as it arrives. Without a loaded model, or
    /// with a blank query, the result is a single fixed message. Fails with
    /// [`TranslatorError::Busy`] while another translation is running.
    pub async fn translate(
        &self,
        on_fragment: impl FnMut(&str),
    ) -> Result<TranslationResult, TranslatorError> {
        self.run(None, on_fragment).await
    }

    /// Replace the whole form and translate it, as one step.
    ///
    /// Unlike `set_query` followed by [`Self::translate`], a concurrent caller
    /// cannot change the form in between.
    pub async fn submit(
        &self,
        form: Form,
        on_fragment: impl FnMut(&str),
    ) -> Result<TranslationResult, TranslatorError> {
        self.run(Some(form), on_fragment).await
    }

    async fn run(
        &self,
        form: Option<Form>,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<TranslationResult, TranslatorError> {
        let _busy = BusyGuard::acquire(&self.busy).ok_or(TranslatorError::Busy)?;

        let request = {
            let mut current = lock(&self.form);
            if let Some(form) = form {
                *current = form;
            }
            current.request()
        };
        lock(&self.result).clear();

        let rx = spawn_translation(self.acquirer.session(), request, self.normalization);
        let mut result = TranslationResult::new();
        receive_into(rx, &mut result, |fragment| {
            on_fragment(fragment);
            lock(&self.result).push(fragment);
        })
        .await;

        *lock(&self.result) = result.clone();
        Ok(result)
    }

    pub fn is_translating(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl<L: ModelLoader> Drop for Translator<L> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.background).take() {
            task.abort();
        }
        self.acquirer.release();
        info!("Translator closed");
    }
}

/// Marks a translation as running until dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
