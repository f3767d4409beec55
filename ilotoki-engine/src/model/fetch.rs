//! Streaming model download
//!
//! [`Fetcher::fetch`] returns a lazy stream of [`ProgressEvent`]s. Polling the
//! stream drives the transfer; dropping it cancels the request and closes the
//! file. Bytes go to `<dest>.part` and are renamed to `dest` only once the
//! body is complete, so an existing `dest` is always a whole file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures_util::{Stream, stream};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use super::error::TransferError;

type Result<T> = std::result::Result<T, TransferError>;

/// Size of the write buffer between the socket and the file.
pub const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Without a `Content-Length`, report progress every this many bytes.
pub const UNKNOWN_SIZE_STEP: u64 = 1024 * 1024;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Bytes written so far and the expected total (if the server sent one).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressEvent {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl ProgressEvent {
    /// Whole percentage points, `None` when the size is unknown.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total?;
        if total == 0 {
            return Some(100);
        }
        Some((self.downloaded.min(total) * 100 / total) as u8)
    }

    /// "1.23 / 2.34 GiB"
    pub fn size_text(&self) -> Option<String> {
        let total = self.total?;
        Some(format!(
            "{:.2} / {:.2} GiB",
            self.downloaded as f64 / GIB,
            total as f64 / GIB
        ))
    }
}

/// HTTP downloader for model files.
#[derive(Debug, Clone, Default)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Download `url` into `dest`.
    ///
    /// If `dest` already exists no request is made and a single 100% event is
    /// produced. Otherwise events are throttled to one per percentage point
    /// (or per [`UNKNOWN_SIZE_STEP`] without a `Content-Length`), and a final
    /// 100% event is produced once the file is in place.
    pub fn fetch(
        &self,
        url: &str,
        dest: &Path,
    ) -> impl Stream<Item = Result<ProgressEvent>> + Send + 'static {
        let start = FetchState::Start {
            client: self.client.clone(),
            url: url.to_string(),
            dest: dest.to_path_buf(),
        };
        stream::try_unfold(start, FetchState::advance)
    }
}

/// Path the body is written to before it is complete.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

enum FetchState {
    Start {
        client: reqwest::Client,
        url: String,
        dest: PathBuf,
    },
    Streaming(Box<Transfer>),
    Done,
}

impl FetchState {
    async fn advance(self) -> Result<Option<(ProgressEvent, FetchState)>> {
        match self {
            FetchState::Start { client, url, dest } => {
                if let Ok(meta) = tokio::fs::metadata(&dest).await
                    && meta.is_file()
                {
                    debug!("{:?} already present, skipping download", dest);
                    let size = meta.len();
                    let event = ProgressEvent {
                        downloaded: size,
                        total: Some(size),
                    };
                    return Ok(Some((event, FetchState::Done)));
                }
                Transfer::open(&client, url, dest).await?.pump().await
            }
            FetchState::Streaming(transfer) => transfer.pump().await,
            FetchState::Done => Ok(None),
        }
    }
}

struct Transfer {
    url: String,
    dest: PathBuf,
    partial: PathBuf,
    response: reqwest::Response,
    file: BufWriter<File>,
    downloaded: u64,
    total: Option<u64>,
    last_percent: Option<u8>,
    last_reported: u64,
}

impl Transfer {
    async fn open(client: &reqwest::Client, url: String, dest: PathBuf) -> Result<Box<Self>> {
        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(source) => return Err(TransferError::Request { url, source }),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status { url, status });
        }

        let total = response.content_length();
        match total {
            Some(bytes) => info!("Downloading {} ({} bytes)", url, bytes),
            None => info!("Downloading {} (size unknown)", url),
        }

        let partial = partial_path(&dest);
        let file = File::create(&partial)
            .await
            .map_err(|source| TransferError::Io {
                path: partial.clone(),
                source,
            })?;

        Ok(Box::new(Self {
            url,
            dest,
            partial,
            response,
            file: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            downloaded: 0,
            total,
            last_percent: None,
            last_reported: 0,
        }))
    }

    /// Read until the next event is due or the body ends.
    async fn pump(mut self: Box<Self>) -> Result<Option<(ProgressEvent, FetchState)>> {
        loop {
            let chunk = match self.response.chunk().await {
                Ok(chunk) => chunk,
                Err(source) => {
                    return Err(TransferError::Request {
                        url: self.url.clone(),
                        source,
                    });
                }
            };

            let Some(bytes) = chunk else {
                let event = self.finish().await?;
                return Ok(Some((event, FetchState::Done)));
            };

            if let Err(source) = self.file.write_all(&bytes).await {
                return Err(TransferError::Io {
                    path: self.partial.clone(),
                    source,
                });
            }
            self.downloaded += bytes.len() as u64;

            if let Some(event) = self.throttled() {
                return Ok(Some((event, FetchState::Streaming(self))));
            }
        }
    }

    fn throttled(&mut self) -> Option<ProgressEvent> {
        let event = ProgressEvent {
            downloaded: self.downloaded,
            total: self.total,
        };
        let due = match event.percent() {
            Some(percent) => self.last_percent.is_none_or(|last| percent > last),
            None => self.downloaded - self.last_reported >= UNKNOWN_SIZE_STEP,
        };
        if !due {
            return None;
        }
        self.last_percent = event.percent();
        self.last_reported = self.downloaded;
        Some(event)
    }

    async fn finish(self: Box<Self>) -> Result<ProgressEvent> {
        let Transfer {
            url,
            dest,
            partial,
            mut file,
            downloaded,
            total,
            ..
        } = *self;

        let io_error = |source| TransferError::Io {
            path: partial.clone(),
            source,
        };
        file.flush().await.map_err(io_error)?;
        file.get_ref().sync_all().await.map_err(io_error)?;
        drop(file);

        if let Some(expected) = total
            && downloaded != expected
        {
            return Err(TransferError::Truncated {
                downloaded,
                expected,
            });
        }

        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|source| TransferError::Io {
                path: dest.clone(),
                source,
            })?;
        info!("Downloaded {} ({} bytes) to {:?}", url, downloaded, dest);

        Ok(ProgressEvent {
            downloaded,
            total: Some(total.unwrap_or(downloaded)),
        })
    }
}
