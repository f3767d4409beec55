//! Terminal progress bars for model download

use indicatif::{ProgressBar, ProgressStyle};
use ilotoki_engine::model::{AcquisitionState, ProgressEvent};
use tokio::sync::watch;

const DOWNLOAD_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA: {eta}) {msg}";

/// A byte-counting bar; the length is set by the first event with a known size.
pub fn download_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(DOWNLOAD_TEMPLATE)
            .expect("download bar template is valid")
            .progress_chars("=>-"),
    );
    pb
}

pub fn show_event(pb: &ProgressBar, event: &ProgressEvent) {
    if let Some(total) = event.total {
        pb.set_length(total);
    }
    pb.set_position(event.downloaded);
}

/// Mirror acquisition state onto `pb` until the model is ready or failed for good.
pub async fn follow_acquisition<S>(mut rx: watch::Receiver<AcquisitionState<S>>, pb: ProgressBar) {
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        pb.set_message(state.status_line());
        match state {
            AcquisitionState::Downloading(event) => show_event(&pb, &event),
            AcquisitionState::Ready(_) | AcquisitionState::Failed { retrying: false, .. } => {
                pb.finish_and_clear();
                return;
            }
            _ => {}
        }
    }
}
