//! Raw PCM file source
//!
//! `file:///path/to/track.pcm` plays a headerless s16le file recorded in the
//! service's PCM format. A directory URI resolves to a collection of the
//! `.pcm` / `.raw` files it contains, sorted by name.

use async_trait::async_trait;
use bytes::Bytes;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{AudioTrack, FrameRead, LoadOutcome, SourceLoader, TrackInfo};
use crate::audio::PcmFormat;
use crate::error::SourceError;

const PCM_EXTENSIONS: &[&str] = &["pcm", "raw"];

/// Track backed by a raw PCM file
pub struct PcmFileTrack {
    info: TrackInfo,
    format: PcmFormat,
    reader: BufReader<File>,
    /// Usable length, truncated to whole sample blocks
    length: u64,
    offset: u64,
}

impl PcmFileTrack {
    pub fn open(path: &Path, format: PcmFormat) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let block = format.channels as u64 * 2;
        let raw_len = file.metadata()?.len();
        let length = raw_len - raw_len % block;

        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            info: TrackInfo {
                title,
                uri: format!("file://{}", path.display()),
                duration_ms: Some(format.duration_ms(length)),
                is_stream: false,
            },
            format,
            reader: BufReader::new(file),
            length,
            offset: 0,
        })
    }
}

impl AudioTrack for PcmFileTrack {
    fn info(&self) -> &TrackInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Result<FrameRead, SourceError> {
        let remaining = self.length.saturating_sub(self.offset);
        if remaining == 0 {
            return Ok(FrameRead::End);
        }

        let want = (self.format.frame_bytes() as u64).min(remaining) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            match self.reader.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        if filled == 0 {
            return Ok(FrameRead::End);
        }

        buf.truncate(filled);
        self.offset += filled as u64;
        Ok(FrameRead::Frame(Bytes::from(buf)))
    }

    fn position_ms(&self) -> u64 {
        self.format.duration_ms(self.offset)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, position_ms: u64) -> Result<(), SourceError> {
        let target = self.format.byte_offset(position_ms).min(self.length);
        self.reader.seek(SeekFrom::Start(target))?;
        self.offset = target;
        Ok(())
    }
}

/// Loader for `file:` URIs
pub struct PcmFileLoader {
    format: PcmFormat,
}

impl PcmFileLoader {
    pub fn new(format: PcmFormat) -> Self {
        Self { format }
    }

    fn path_of(uri: &str) -> Option<PathBuf> {
        let rest = uri.split_once(':').map(|(_, rest)| rest)?;
        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }

    fn load_blocking(
        format: PcmFormat,
        uri: &str,
        path: &Path,
    ) -> Result<LoadOutcome, SourceError> {
        if !path.exists() {
            return Err(SourceError::NoMatches(uri.to_string()));
        }

        if !path.is_dir() {
            let track = PcmFileTrack::open(path, format)
                .map_err(|e| SourceError::LoadFailed(e.to_string()))?;
            return Ok(LoadOutcome::Track(Box::new(track)));
        }

        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| SourceError::LoadFailed(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| PCM_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        entries.sort();

        if entries.is_empty() {
            return Err(SourceError::NoMatches(uri.to_string()));
        }

        let mut tracks: Vec<Box<dyn AudioTrack>> = Vec::with_capacity(entries.len());
        for entry in entries {
            let track = PcmFileTrack::open(&entry, format)
                .map_err(|e| SourceError::LoadFailed(e.to_string()))?;
            tracks.push(Box::new(track));
        }

        Ok(LoadOutcome::Collection {
            name: path.display().to_string(),
            tracks,
        })
    }
}

#[async_trait]
impl SourceLoader for PcmFileLoader {
    async fn resolve(&self, uri: &str) -> Result<LoadOutcome, SourceError> {
        let path = Self::path_of(uri).ok_or_else(|| SourceError::NoMatches(uri.to_string()))?;
        let format = self.format;
        let uri = uri.to_string();

        tokio::task::spawn_blocking(move || Self::load_blocking(format, &uri, &path))
            .await
            .map_err(|e| SourceError::LoadFailed(format!("loader task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pcm(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        let data: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_reads_frames_and_ends() {
        let dir = tempfile::tempdir().unwrap();
        let format = PcmFormat::default();
        // one and a half frames plus a stray byte that is not a full sample block
        let path = write_pcm(dir.path(), "clip.pcm", format.frame_bytes() * 3 / 2 + 1);

        let mut track = PcmFileTrack::open(&path, format).unwrap();
        assert_eq!(track.info().duration_ms, Some(30));
        assert_eq!(track.info().title, "clip");

        match track.read_frame().unwrap() {
            FrameRead::Frame(bytes) => assert_eq!(bytes.len(), format.frame_bytes()),
            other => panic!("unexpected {:?}", other),
        }
        match track.read_frame().unwrap() {
            FrameRead::Frame(bytes) => assert_eq!(bytes.len(), format.frame_bytes() / 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(track.read_frame().unwrap(), FrameRead::End));
    }

    #[test]
    fn test_seek_repositions() {
        let dir = tempfile::tempdir().unwrap();
        let format = PcmFormat::default();
        let path = write_pcm(dir.path(), "clip.pcm", format.frame_bytes() * 10);

        let mut track = PcmFileTrack::open(&path, format).unwrap();
        track.seek(100).unwrap();
        assert_eq!(track.position_ms(), 100);
        track.seek(10_000).unwrap();
        assert!(matches!(track.read_frame().unwrap(), FrameRead::End));
        track.seek(u64::MAX).unwrap();
        assert_eq!(track.position_ms(), 200);
        assert!(matches!(track.read_frame().unwrap(), FrameRead::End));
    }

    #[tokio::test]
    async fn test_directory_resolves_to_collection() {
        let dir = tempfile::tempdir().unwrap();
        let format = PcmFormat::default();
        write_pcm(dir.path(), "b.pcm", format.frame_bytes());
        write_pcm(dir.path(), "a.raw", format.frame_bytes());
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let loader = PcmFileLoader::new(format);
        let uri = format!("file://{}", dir.path().display());
        let outcome = loader.resolve(&uri).await.unwrap();
        assert!(matches!(&outcome, LoadOutcome::Collection { tracks, .. } if tracks.len() == 2));

        let first = outcome.into_first().unwrap();
        assert_eq!(first.info().title, "a");
    }

    #[tokio::test]
    async fn test_missing_path_is_no_match() {
        let loader = PcmFileLoader::new(PcmFormat::default());
        let err = loader.resolve("file:///definitely/not/here.pcm").await.unwrap_err();
        assert!(matches!(err, SourceError::NoMatches(_)));
    }
}
