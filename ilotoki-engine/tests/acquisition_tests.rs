//! Integration tests for model download and the acquisition state machine
//!
//! Every test serves the "model" from a local axum server and loads it with a
//! stub loader, so no real model is downloaded.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::StreamExt;
use ilotoki_engine::model::error::{GenerationError, LoadError, TransferError};
use ilotoki_engine::model::fetch::partial_path;
use ilotoki_engine::model::{
    AcquireError, AcquisitionState, Fetcher, InferenceParams, InferenceSession, ModelAcquirer,
    ModelAsset, ModelLoader, ModelStore, Phase, Tokens,
};
use ilotoki_engine::translate::{
    OutputNormalization, TranslationRequest, TranslationResult, receive_into, spawn_translation,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

// ============================================================================
// Helpers
// ============================================================================

const MODEL_SIZE: usize = 300 * 1024;
const FILENAME: &str = "test-model.gguf";

fn model_bytes() -> Vec<u8> {
    (0..MODEL_SIZE).map(|i| (i % 251) as u8).collect()
}

fn full_response() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_LENGTH, MODEL_SIZE.to_string())],
        model_bytes(),
    )
        .into_response()
}

/// Announces the full length, sends half, then resets the connection.
fn truncated_response() -> Response {
    let half = Bytes::from(model_bytes()[..MODEL_SIZE / 2].to_vec());
    let chunks: Vec<Result<Bytes, std::io::Error>> =
        vec![Ok(half), Err(std::io::Error::other("connection reset"))];
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, MODEL_SIZE.to_string())
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .unwrap()
}

fn server_error() -> Response {
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Counts requests and records whether the model directory was empty when
/// each one arrived.
#[derive(Default)]
struct Recorder {
    hits: AtomicUsize,
    dir_empty: Mutex<Vec<bool>>,
}

impl Recorder {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn observe(&self, dir: &Path) -> usize {
        let empty = std::fs::read_dir(dir).map_or(true, |mut d| d.next().is_none());
        self.dir_empty.lock().unwrap().push(empty);
        self.hits.fetch_add(1, Ordering::SeqCst)
    }
}

/// Serve `/model.gguf`; `respond(n)` builds the response for the n-th request.
async fn serve(
    dir: PathBuf,
    recorder: Arc<Recorder>,
    respond: impl Fn(usize) -> Response + Clone + Send + Sync + 'static,
) -> String {
    let app = Router::new().route(
        "/model.gguf",
        get(move || {
            let dir = dir.clone();
            let recorder = Arc::clone(&recorder);
            let respond = respond.clone();
            async move {
                let n = recorder.observe(&dir);
                respond(n)
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/model.gguf", addr)
}

/// Serve `/model.gguf` slowly so a test can act while the download is pending.
async fn serve_slow(recorder: Arc<Recorder>) -> String {
    let app = Router::new().route(
        "/model.gguf",
        get(move || {
            let recorder = Arc::clone(&recorder);
            async move {
                recorder.hits.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                full_response()
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/model.gguf", addr)
}

struct StubSession;

impl InferenceSession for StubSession {
    fn generate(&self, _prompt: &str) -> Result<Tokens<'_>, GenerationError> {
        Ok(Box::new(
            [" mi", " moku", "\n"].into_iter().map(|t| Ok(t.to_string())),
        ))
    }
}

/// Fails the first `fail_first` loads, then checks the file is complete.
struct StubLoader {
    fail_first: usize,
    loads: Arc<AtomicUsize>,
}

impl ModelLoader for StubLoader {
    type Session = StubSession;

    fn load(&self, path: &Path, _params: &InferenceParams) -> Result<StubSession, LoadError> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(LoadError::Model("invalid GGUF magic".into()));
        }
        let bytes = std::fs::read(path).map_err(|e| LoadError::Model(e.into()))?;
        if bytes != model_bytes() {
            return Err(LoadError::Model("corrupt model file".into()));
        }
        Ok(StubSession)
    }
}

/// Takes `delay` to load whatever is on disk.
struct SlowLoader {
    delay: Duration,
}

impl ModelLoader for SlowLoader {
    type Session = StubSession;

    fn load(&self, _path: &Path, _params: &InferenceParams) -> Result<StubSession, LoadError> {
        std::thread::sleep(self.delay);
        Ok(StubSession)
    }
}

struct Fixture {
    _tmp: TempDir,
    dir: PathBuf,
    recorder: Arc<Recorder>,
    loads: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("models");
        Self {
            _tmp: tmp,
            dir,
            recorder: Arc::new(Recorder::default()),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn model_path(&self) -> PathBuf {
        self.dir.join(FILENAME)
    }

    async fn acquirer(
        &self,
        fail_loads: usize,
        respond: impl Fn(usize) -> Response + Clone + Send + Sync + 'static,
    ) -> ModelAcquirer<StubLoader> {
        let url = serve(self.dir.clone(), Arc::clone(&self.recorder), respond).await;
        self.acquirer_for(url, fail_loads)
    }

    fn acquirer_for(&self, url: String, fail_loads: usize) -> ModelAcquirer<StubLoader> {
        let loader = StubLoader {
            fail_first: fail_loads,
            loads: Arc::clone(&self.loads),
        };
        ModelAcquirer::new(
            ModelAsset::new("test", FILENAME, url),
            ModelStore::new(&self.dir),
            loader,
            InferenceParams::default(),
        )
    }
}

/// Record every state the acquirer publishes until it settles.
fn watch_states(
    acquirer: &ModelAcquirer<StubLoader>,
) -> tokio::task::JoinHandle<Vec<AcquisitionState<StubSession>>> {
    let mut rx = acquirer.subscribe();
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            let settled = matches!(
                state,
                AcquisitionState::Ready(_) | AcquisitionState::Failed { retrying: false, .. }
            );
            seen.push(state);
            if settled {
                break;
            }
        }
        seen
    })
}

async fn wait_for_phase<L: ModelLoader>(acquirer: &ModelAcquirer<L>, phase: Phase) {
    let mut rx = acquirer.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|state| state.phase() == phase),
    )
    .await
    .expect("timed out waiting for phase")
    .expect("state channel closed");
}

// ============================================================================
// Fetcher
// ============================================================================

mod fetch_tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_is_monotonic_and_reaches_100() {
        let fx = Fixture::new();
        std::fs::create_dir_all(&fx.dir).unwrap();
        let url = serve(fx.dir.clone(), Arc::clone(&fx.recorder), |_| full_response()).await;

        let events: Vec<_> = Fetcher::new()
            .fetch(&url, &fx.model_path())
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("fetch failed");

        let percents: Vec<u8> = events.iter().map(|e| e.percent().unwrap()).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
        assert_eq!(percents.last(), Some(&100));
        assert!(events.len() <= 102, "progress not throttled: {} events", events.len());
        assert_eq!(events.last().unwrap().downloaded, MODEL_SIZE as u64);

        assert_eq!(std::fs::read(fx.model_path()).unwrap(), model_bytes());
        assert!(!partial_path(&fx.model_path()).exists());
    }

    #[tokio::test]
    async fn test_existing_file_is_not_fetched() {
        let fx = Fixture::new();
        std::fs::create_dir_all(&fx.dir).unwrap();
        std::fs::write(fx.model_path(), b"already here").unwrap();
        let url = serve(fx.dir.clone(), Arc::clone(&fx.recorder), |_| full_response()).await;

        let events: Vec<_> = Fetcher::new()
            .fetch(&url, &fx.model_path())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.percent(), Some(100));
        assert_eq!(fx.recorder.hits(), 0);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let fx = Fixture::new();
        std::fs::create_dir_all(&fx.dir).unwrap();
        let url = serve(fx.dir.clone(), Arc::clone(&fx.recorder), |_| server_error()).await;

        let events: Vec<_> = Fetcher::new()
            .fetch(&url, &fx.model_path())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Err(TransferError::Status { status, .. }) if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert!(!fx.model_path().exists());
    }

    #[tokio::test]
    async fn test_dropped_connection_leaves_no_model_file() {
        let fx = Fixture::new();
        std::fs::create_dir_all(&fx.dir).unwrap();
        let url = serve(fx.dir.clone(), Arc::clone(&fx.recorder), |_| truncated_response()).await;

        let events: Vec<_> = Fetcher::new()
            .fetch(&url, &fx.model_path())
            .collect::<Vec<_>>()
            .await;

        assert!(events.last().unwrap().is_err());
        assert!(!fx.model_path().exists());
    }

    #[tokio::test]
    async fn test_unknown_length_completes_at_100() {
        let fx = Fixture::new();
        std::fs::create_dir_all(&fx.dir).unwrap();
        let url = serve(fx.dir.clone(), Arc::clone(&fx.recorder), |_| {
            let chunks: Vec<Result<Bytes, std::io::Error>> = model_bytes()
                .chunks(64 * 1024)
                .map(|c| Ok(Bytes::from(c.to_vec())))
                .collect();
            Response::new(Body::from_stream(futures_util::stream::iter(chunks)))
        })
        .await;

        let events: Vec<_> = Fetcher::new()
            .fetch(&url, &fx.model_path())
            .collect::<Vec<_>>()
            .await;

        let last = events.last().unwrap().as_ref().unwrap();
        assert_eq!(last.total, Some(MODEL_SIZE as u64));
        assert_eq!(last.percent(), Some(100));
        assert_eq!(std::fs::read(fx.model_path()).unwrap(), model_bytes());
    }
}

// ============================================================================
// Acquisition state machine
// ============================================================================

mod acquire_tests {
    use super::*;

    #[tokio::test]
    async fn test_download_then_load() {
        let fx = Fixture::new();
        let acquirer = fx.acquirer(0, |_| full_response()).await;
        let states = watch_states(&acquirer);

        let session = acquirer.acquire().await.expect("acquire failed");
        assert!(acquirer.state().is_ready());
        assert!(Arc::ptr_eq(&session, &acquirer.session().unwrap()));
        assert_eq!(fx.recorder.hits(), 1);
        assert_eq!(fx.loads.load(Ordering::SeqCst), 1);

        let phases: Vec<Phase> = states.await.unwrap().iter().map(|s| s.phase()).collect();
        assert_eq!(phases.last(), Some(&Phase::Ready));
        assert!(phases.contains(&Phase::Downloading));
    }

    #[tokio::test]
    async fn test_existing_file_goes_straight_to_loading() {
        let fx = Fixture::new();
        std::fs::create_dir_all(&fx.dir).unwrap();
        std::fs::write(fx.model_path(), model_bytes()).unwrap();
        let acquirer = fx.acquirer(0, |_| full_response()).await;
        let states = watch_states(&acquirer);

        acquirer.acquire().await.expect("acquire failed");
        assert_eq!(fx.recorder.hits(), 0);

        let phases: Vec<Phase> = states.await.unwrap().iter().map(|s| s.phase()).collect();
        assert!(!phases.contains(&Phase::Downloading), "{:?}", phases);
        assert_eq!(phases.last(), Some(&Phase::Ready));
    }

    #[tokio::test]
    async fn test_transfer_failure_wipes_directory_before_retry() {
        let fx = Fixture::new();
        std::fs::create_dir_all(&fx.dir).unwrap();
        std::fs::write(fx.dir.join("stale.bin"), b"left over").unwrap();
        let acquirer = fx
            .acquirer(0, |n| {
                if n == 0 {
                    truncated_response()
                } else {
                    full_response()
                }
            })
            .await;
        let states = watch_states(&acquirer);

        acquirer.acquire().await.expect("retry should succeed");
        assert_eq!(fx.recorder.hits(), 2);
        assert_eq!(*fx.recorder.dir_empty.lock().unwrap(), [false, true]);
        assert!(!fx.dir.join("stale.bin").exists());

        let states = states.await.unwrap();
        assert!(states.iter().any(|s| matches!(
            s,
            AcquisitionState::Failed { retrying: true, .. }
        )));
        assert!(states.last().unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_load_failure_redownloads() {
        let fx = Fixture::new();
        let acquirer = fx.acquirer(1, |_| full_response()).await;

        acquirer.acquire().await.expect("retry should succeed");
        assert_eq!(fx.loads.load(Ordering::SeqCst), 2);
        assert_eq!(fx.recorder.hits(), 2);
        // The first download was deleted before the second request arrived
        assert_eq!(*fx.recorder.dir_empty.lock().unwrap(), [true, true]);
    }

    #[tokio::test]
    async fn test_second_failure_is_terminal() {
        let fx = Fixture::new();
        let acquirer = fx.acquirer(0, |_| server_error()).await;

        let err = acquirer.acquire().await.err().expect("acquire should fail");
        assert!(matches!(err, AcquireError::Transfer(TransferError::Status { .. })));
        assert_eq!(fx.recorder.hits(), 2, "exactly one automatic retry");

        match acquirer.state() {
            AcquisitionState::Failed { message, retrying } => {
                assert!(!retrying);
                assert!(message.contains("500"), "{}", message);
            }
            other => panic!("expected terminal failure, got {:?}", other),
        }
        assert!(acquirer.session().is_none());
    }

    #[tokio::test]
    async fn test_client_timeout_counts_as_failure() {
        let fx = Fixture::new();
        let url = serve_slow(Arc::clone(&fx.recorder)).await;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let acquirer = fx
            .acquirer_for(url, 0)
            .with_fetcher(Fetcher::with_client(client));

        let err = acquirer.acquire().await.err().expect("acquire should fail");
        assert!(matches!(err, AcquireError::Transfer(TransferError::Request { .. })));
        assert_eq!(fx.recorder.hits(), 2);
        assert_eq!(acquirer.state().phase(), Phase::Failed);
        assert!(!fx.model_path().exists());
    }

    #[tokio::test]
    async fn test_manual_retry_after_terminal_failure() {
        let fx = Fixture::new();
        let acquirer = fx
            .acquirer(0, |n| if n < 2 { server_error() } else { full_response() })
            .await;

        assert!(acquirer.acquire().await.is_err());
        assert_eq!(acquirer.state().phase(), Phase::Failed);

        acquirer.retry().await.expect("manual retry failed");
        assert!(acquirer.state().is_ready());
        assert_eq!(fx.recorder.hits(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_is_rejected() {
        let fx = Fixture::new();
        let url = serve_slow(Arc::clone(&fx.recorder)).await;
        let acquirer = Arc::new(fx.acquirer_for(url, 0));

        let running = tokio::spawn({
            let acquirer = Arc::clone(&acquirer);
            async move { acquirer.acquire().await.map(|_| ()) }
        });
        wait_for_phase(&acquirer, Phase::Downloading).await;

        assert!(matches!(
            acquirer.acquire().await,
            Err(AcquireError::InProgress)
        ));
        running.abort();
    }

    #[tokio::test]
    async fn test_release_during_load_discards_session() {
        let fx = Fixture::new();
        std::fs::create_dir_all(&fx.dir).unwrap();
        std::fs::write(fx.model_path(), model_bytes()).unwrap();
        let acquirer = Arc::new(ModelAcquirer::new(
            ModelAsset::new("test", FILENAME, "http://127.0.0.1:9/model.gguf"),
            ModelStore::new(&fx.dir),
            SlowLoader {
                delay: Duration::from_millis(300),
            },
            InferenceParams::default(),
        ));

        let running = tokio::spawn({
            let acquirer = Arc::clone(&acquirer);
            async move { acquirer.acquire().await.map(|_| ()) }
        });
        wait_for_phase(&acquirer, Phase::Loading).await;
        acquirer.release();

        assert!(matches!(running.await.unwrap(), Err(AcquireError::Released)));
        assert_eq!(acquirer.state().phase(), Phase::Idle);
        assert!(acquirer.session().is_none());

        acquirer.acquire().await.unwrap();
        assert!(acquirer.state().is_ready());
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle() {
        let fx = Fixture::new();
        let url = serve_slow(Arc::clone(&fx.recorder)).await;
        let acquirer = Arc::new(fx.acquirer_for(url, 0));

        let running = tokio::spawn({
            let acquirer = Arc::clone(&acquirer);
            async move { acquirer.acquire().await.map(|_| ()) }
        });
        wait_for_phase(&acquirer, Phase::Downloading).await;

        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());
        assert_eq!(acquirer.state().phase(), Phase::Idle);
        assert!(!fx.model_path().exists());
    }

    #[tokio::test]
    async fn test_release_drops_session() {
        let fx = Fixture::new();
        let acquirer = fx.acquirer(0, |_| full_response()).await;
        acquirer.acquire().await.unwrap();

        acquirer.release();
        assert_eq!(acquirer.state().phase(), Phase::Idle);
        assert!(acquirer.session().is_none());
        // The file stays; the next acquire only reloads it
        acquirer.acquire().await.unwrap();
        assert_eq!(fx.recorder.hits(), 1);
        assert_eq!(fx.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_translate_with_acquired_session() {
        let fx = Fixture::new();
        let acquirer = fx.acquirer(0, |_| full_response()).await;
        acquirer.acquire().await.unwrap();

        let rx = spawn_translation(
            acquirer.session(),
            TranslationRequest::new("I eat", false, "English"),
            OutputNormalization::Trim,
        );
        let mut result = TranslationResult::new();
        receive_into(rx, &mut result, |_| {}).await;
        assert_eq!(result.text(), "mi moku");
    }
}
