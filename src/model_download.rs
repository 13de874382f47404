use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

const HANDPOSE_MODEL_FILENAME: &str = "handpose_estimation_mediapipe_2023feb.onnx";
const HANDPOSE_MODEL_URL: &str = "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/handpose_estimation_mediapipe_2023feb.onnx";

pub fn default_handpose_model_path() -> PathBuf {
    PathBuf::from("models").join(HANDPOSE_MODEL_FILENAME)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelDownloadEvent {
    AlreadyPresent,
    Started { total: Option<u64> },
    Progress { downloaded: u64, total: Option<u64> },
    Finished,
}

/// Makes sure the handpose model exists at `model_path`, fetching it with a
/// terminal progress bar when it is missing.
pub fn ensure_handpose_model_ready<F>(model_path: &Path, mut on_event: F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    if model_path.exists() {
        log::debug!("handpose model found at {}", model_path.display());
        on_event(ModelDownloadEvent::AlreadyPresent);
        on_event(ModelDownloadEvent::Finished);
        return Ok(());
    }

    if let Some(dir) = model_path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create model directory {}", dir.display()))?;
    }

    let mut bar: Option<ProgressBar> = None;
    let result = fetch(HANDPOSE_MODEL_URL, model_path, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total } => bar = Some(progress_bar(*total)),
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(bar) = &bar {
                    bar.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished => {
                if let Some(bar) = bar.take() {
                    bar.finish_with_message("handpose model ready");
                }
            }
            ModelDownloadEvent::AlreadyPresent => {}
        }
        on_event(event);
    });

    if result.is_err() {
        if let Some(bar) = bar.take() {
            bar.abandon();
        }
    }
    result.with_context(|| format!("failed to fetch handpose model into {}", model_path.display()))
}

/// Counts bytes on their way to disk.
struct ProgressWriter<'a, W, F> {
    inner: W,
    written: u64,
    total: Option<u64>,
    on_event: &'a mut F,
}

impl<W: Write, F: FnMut(ModelDownloadEvent)> Write for ProgressWriter<'_, W, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        (self.on_event)(ModelDownloadEvent::Progress {
            downloaded: self.written,
            total: self.total,
        });
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn fetch<F>(url: &str, dest: &Path, on_event: &mut F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!("fetching {url}");

    let mut response = Client::new()
        .get(url)
        .send()
        .context("model request failed")?
        .error_for_status()
        .context("model server returned an error")?;
    let total = response.content_length();
    on_event(ModelDownloadEvent::Started { total });

    // Written beside the target and renamed, so a partial file never looks complete.
    let partial = dest.with_extension("part");
    let file =
        File::create(&partial).with_context(|| format!("failed to create {}", partial.display()))?;
    let mut writer = ProgressWriter {
        inner: file,
        written: 0,
        total,
        on_event: &mut *on_event,
    };
    let copied = io::copy(&mut response, &mut writer).context("model transfer interrupted")?;
    writer
        .inner
        .sync_all()
        .context("failed to sync model file")?;
    drop(writer);

    fs::rename(&partial, dest)
        .with_context(|| format!("failed to move {} into place", partial.display()))?;
    log::info!("handpose model saved to {} ({copied} bytes)", dest.display());

    on_event(ModelDownloadEvent::Finished);
    Ok(())
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    let Some(total) = total.filter(|total| *total > 0) else {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} fetching handpose model")
        {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        return bar;
    };

    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {bytes}/{total_bytes} [{wide_bar:.cyan/blue}] {bytes_per_sec}, {eta}",
    ) {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_model_is_not_downloaded() {
        let path = std::env::temp_dir().join(format!("isl-model-{}.onnx", std::process::id()));
        fs::write(&path, b"onnx").unwrap();

        let mut events = Vec::new();
        ensure_handpose_model_ready(&path, |event| events.push(event)).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(
            events,
            vec![ModelDownloadEvent::AlreadyPresent, ModelDownloadEvent::Finished]
        );
    }

    #[test]
    fn progress_writer_reports_running_total() {
        let mut events: Vec<ModelDownloadEvent> = Vec::new();
        let mut on_event = |event: ModelDownloadEvent| events.push(event);
        let mut writer = ProgressWriter {
            inner: Vec::new(),
            written: 0,
            total: Some(6),
            on_event: &mut on_event,
        };
        writer.write_all(b"abc").unwrap();
        writer.write_all(b"def").unwrap();
        assert_eq!(writer.inner, b"abcdef");
        drop(writer);

        assert_eq!(
            events.last(),
            Some(&ModelDownloadEvent::Progress {
                downloaded: 6,
                total: Some(6)
            })
        );
    }

    #[test]
    fn default_path_lives_under_models() {
        let path = default_handpose_model_path();
        assert!(path.starts_with("models"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("onnx"));
    }
}
