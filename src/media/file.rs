use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use super::device::{MediaConstraints, MediaDevices, MediaStream, TrackKind, VideoFrame};
use crate::error::MediaError;

/// Media provider serving still images from a directory as camera frames
pub struct FileMedia {
    frames_dir: PathBuf,
}

impl FileMedia {
    pub fn new(frames_dir: impl AsRef<Path>) -> Self {
        Self {
            frames_dir: frames_dir.as_ref().to_path_buf(),
        }
    }

    async fn list_frames(&self) -> Result<Vec<PathBuf>, MediaError> {
        let unavailable = |e: std::io::Error| MediaError::Unavailable(format!("{}: {}", self.frames_dir.display(), e));
        let mut entries = tokio::fs::read_dir(&self.frames_dir).await.map_err(unavailable)?;

        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let path = entry.path();
            let is_jpeg = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg"));
            if is_jpeg {
                frames.push(path);
            }
        }
        frames.sort();

        if frames.is_empty() {
            return Err(MediaError::Unavailable(format!(
                "no JPEG frames in {}",
                self.frames_dir.display()
            )));
        }
        Ok(frames)
    }
}

#[async_trait::async_trait]
impl MediaDevices for FileMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Box<dyn MediaStream>, MediaError> {
        let frames = self.list_frames().await?;
        info!(
            "Opened file media: {} frames from {} (audio={}, video={})",
            frames.len(),
            self.frames_dir.display(),
            constraints.audio,
            constraints.video
        );

        Ok(Box::new(FileStream {
            frames,
            next: 0,
            started: Instant::now(),
            audio_enabled: constraints.audio,
            video_enabled: constraints.video,
            has_audio: constraints.audio,
            released: false,
        }))
    }

    async fn speak(&self, text: &str) {
        info!("Speaking prompt: {}", text);
    }

    fn name(&self) -> &str {
        "file"
    }
}

struct FileStream {
    frames: Vec<PathBuf>,
    next: usize,
    started: Instant,
    audio_enabled: bool,
    video_enabled: bool,
    has_audio: bool,
    released: bool,
}

#[async_trait::async_trait]
impl MediaStream for FileStream {
    async fn grab_frame(&mut self) -> Result<VideoFrame, MediaError> {
        if self.released {
            return Err(MediaError::Unavailable("stream released".to_string()));
        }
        if !self.video_enabled {
            return Err(MediaError::Frame("video track disabled".to_string()));
        }

        let path = &self.frames[self.next % self.frames.len()];
        self.next += 1;

        let jpeg = tokio::fs::read(path)
            .await
            .map_err(|e| MediaError::Frame(format!("{}: {}", path.display(), e)))?;

        Ok(VideoFrame {
            jpeg,
            timestamp_ms: self.started.elapsed().as_millis() as u64,
        })
    }

    fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> bool {
        match kind {
            TrackKind::Audio if self.has_audio => {
                self.audio_enabled = enabled;
                true
            }
            TrackKind::Audio => false,
            TrackKind::Video => {
                self.video_enabled = enabled;
                true
            }
        }
    }

    fn is_track_enabled(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio_enabled,
            TrackKind::Video => self.video_enabled,
        }
    }

    fn release(&mut self) {
        if self.released {
            warn!("File media stream released twice");
            return;
        }
        self.released = true;
        info!("Released file media stream after {} frames", self.next);
    }
}
