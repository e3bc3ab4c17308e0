//! Voice capture.
//!
//! DESIGN
//! ======
//! A recorder is an explicit suspend-until-stop operation: `AudioSource::start`
//! acquires the device and returns a live `Recording`; `Recording::stop`
//! signals the producer, waits until every captured chunk has arrived and
//! returns them as one clip. Producers push chunks through a bounded channel,
//! so a slow consumer applies backpressure instead of growing memory.

#[cfg(test)]
#[path = "capture_test.rs"]
mod capture_test;

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};

const CHUNK_CHANNEL_CAPACITY: usize = 32;
const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone unavailable: {0}")]
    Unavailable(String),
    #[error("recording produced no audio")]
    Empty,
}

/// A finalized recording, ready for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioClip")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A capture device.
#[async_trait::async_trait]
pub trait AudioSource: Send + Sync {
    /// Acquire the device and begin recording.
    async fn start(&self) -> Result<Box<dyn Recording>, CaptureError>;
}

/// A recording in progress.
#[async_trait::async_trait]
pub trait Recording: Send {
    /// Stop capturing and collect everything recorded so far into one clip.
    async fn stop(&mut self) -> Result<AudioClip, CaptureError>;
}

// =============================================================================
// CHUNK RECORDING
// =============================================================================

/// Producer half handed to whatever drives the device.
pub struct ChunkSink {
    chunks: mpsc::Sender<Vec<u8>>,
    stop: oneshot::Receiver<()>,
}

impl ChunkSink {
    /// Forward a chunk. Returns `false` once the recording side is gone.
    pub async fn push(&self, chunk: Vec<u8>) -> bool {
        self.chunks.send(chunk).await.is_ok()
    }

    /// Resolves when the recording is stopped or dropped.
    pub async fn stopped(&mut self) {
        let _ = (&mut self.stop).await;
    }
}

/// Accumulates chunks until stopped.
pub struct ChunkRecording {
    chunks: mpsc::Receiver<Vec<u8>>,
    stop: Option<oneshot::Sender<()>>,
    mime: String,
    extension: String,
}

impl ChunkRecording {
    /// Create a recording and the sink its producer writes to.
    #[must_use]
    pub fn channel(mime: &str, extension: &str) -> (ChunkSink, Self) {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let sink = ChunkSink { chunks: chunk_tx, stop: stop_rx };
        let recording =
            Self { chunks: chunk_rx, stop: Some(stop_tx), mime: mime.to_owned(), extension: extension.to_owned() };
        (sink, recording)
    }
}

#[async_trait::async_trait]
impl Recording for ChunkRecording {
    async fn stop(&mut self) -> Result<AudioClip, CaptureError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = self.chunks.recv().await {
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(CaptureError::Empty);
        }
        tracing::debug!(bytes = bytes.len(), "recording finalized");
        Ok(AudioClip {
            file_name: format!("voice-{}.{}", uuid::Uuid::new_v4(), self.extension),
            mime: self.mime.clone(),
            bytes,
        })
    }
}

// =============================================================================
// SOURCES
// =============================================================================

/// Streams an audio file in chunks as if it were a live microphone.
#[derive(Debug, Clone)]
pub struct FileAudioSource {
    path: PathBuf,
    chunk_size: usize,
}

impl FileAudioSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), chunk_size: DEFAULT_CHUNK_SIZE }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait::async_trait]
impl AudioSource for FileAudioSource {
    async fn start(&self) -> Result<Box<dyn Recording>, CaptureError> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| CaptureError::Unavailable(format!("{}: {e}", self.path.display())))?;
        let (mime, extension) = audio_type(&self.path);
        let (mut sink, recording) = ChunkRecording::channel(mime, extension);
        let chunk_size = self.chunk_size;
        let path = self.path.clone();

        // The whole file counts as captured audio, so a quick stop still
        // yields the complete clip.
        tokio::spawn(async move {
            let mut buf = vec![0u8; chunk_size];
            loop {
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if !sink.push(buf[..n].to_vec()).await {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, path = %path.display(), "audio read failed");
                        break;
                    }
                }
            }
            sink.stopped().await;
        });

        tracing::debug!(path = %self.path.display(), "recording started");
        Ok(Box::new(recording))
    }
}

/// No capture device configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableAudioSource;

#[async_trait::async_trait]
impl AudioSource for UnavailableAudioSource {
    async fn start(&self) -> Result<Box<dyn Recording>, CaptureError> {
        Err(CaptureError::Unavailable("no microphone configured; set VYAPAR_MIC_FILE".to_owned()))
    }
}

fn audio_type(path: &Path) -> (&'static str, &'static str) {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "wav" => ("audio/wav", "wav"),
        "mp3" => ("audio/mpeg", "mp3"),
        "ogg" | "oga" => ("audio/ogg", "ogg"),
        "m4a" | "mp4" => ("audio/mp4", "m4a"),
        _ => ("audio/webm", "webm"),
    }
}
