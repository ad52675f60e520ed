//! Track sources
//!
//! A [`SourceLoader`] turns a URI into a playable [`AudioTrack`] (or a
//! collection of them). Tracks hand out fixed-format PCM frames on demand;
//! decoding compressed media is left to loaders outside this crate.

pub mod pcm_file;
pub mod tone;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::audio::PcmFormat;
use crate::error::SourceError;

pub use pcm_file::{PcmFileLoader, PcmFileTrack};
pub use tone::{ToneLoader, ToneTrack};

/// Descriptive metadata of a loaded track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub title: String,
    pub uri: String,
    /// `None` for unbounded streams
    pub duration_ms: Option<u64>,
    pub is_stream: bool,
}

/// Result of pulling one frame from a track
#[derive(Debug)]
pub enum FrameRead {
    Frame(Bytes),
    /// Nothing available right now, try again later
    Pending,
    End,
}

/// A loaded, playable track
pub trait AudioTrack: Send {
    fn info(&self) -> &TrackInfo;

    /// Pull the next frame. Never blocks for longer than a local read.
    fn read_frame(&mut self) -> Result<FrameRead, SourceError>;

    /// Current position in milliseconds
    fn position_ms(&self) -> u64;

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _position_ms: u64) -> Result<(), SourceError> {
        Err(SourceError::SeekUnsupported)
    }
}

pub type BoxedTrack = Box<dyn AudioTrack>;

/// Successful resolution of a URI
pub enum LoadOutcome {
    Track(BoxedTrack),
    Collection {
        name: String,
        tracks: Vec<BoxedTrack>,
    },
}

impl LoadOutcome {
    /// The single track, or the first entry of a collection
    pub fn into_first(self) -> Option<BoxedTrack> {
        match self {
            LoadOutcome::Track(track) => Some(track),
            LoadOutcome::Collection { tracks, .. } => tracks.into_iter().next(),
        }
    }
}

impl std::fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadOutcome::Track(track) => f.debug_tuple("Track").field(track.info()).finish(),
            LoadOutcome::Collection { name, tracks } => f
                .debug_struct("Collection")
                .field("name", name)
                .field("len", &tracks.len())
                .finish(),
        }
    }
}

/// Resolves URIs into tracks
#[async_trait]
pub trait SourceLoader: Send + Sync {
    /// Resolve a URI. Unknown items fail with [`SourceError::NoMatches`],
    /// broken ones with [`SourceError::LoadFailed`].
    async fn resolve(&self, uri: &str) -> Result<LoadOutcome, SourceError>;
}

/// Dispatches URIs to loaders by scheme
#[derive(Default)]
pub struct SourceRouter {
    loaders: HashMap<String, Arc<dyn SourceLoader>>,
}

impl SourceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the built-in `tone:` and `file:` loaders
    pub fn with_defaults(format: PcmFormat) -> Self {
        let mut router = Self::new();
        router.register("tone", Arc::new(ToneLoader::new(format)));
        router.register("file", Arc::new(PcmFileLoader::new(format)));
        router
    }

    pub fn register(&mut self, scheme: &str, loader: Arc<dyn SourceLoader>) {
        self.loaders.insert(scheme.to_ascii_lowercase(), loader);
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

#[async_trait]
impl SourceLoader for SourceRouter {
    async fn resolve(&self, uri: &str) -> Result<LoadOutcome, SourceError> {
        let scheme = uri
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| SourceError::NoMatches(uri.to_string()))?;

        match self.loaders.get(&scheme) {
            Some(loader) => loader.resolve(uri).await,
            None => {
                tracing::debug!("No loader registered for scheme {:?}", scheme);
                Err(SourceError::NoMatches(uri.to_string()))
            }
        }
    }
}

/// Split `scheme:rest?query` into `rest` and its query pairs
pub(crate) fn split_query(rest: &str) -> (&str, Vec<(&str, &str)>) {
    match rest.split_once('?') {
        Some((path, query)) => {
            let pairs = query
                .split('&')
                .filter(|p| !p.is_empty())
                .map(|p| p.split_once('=').unwrap_or((p, "")))
                .collect();
            (path, pairs)
        }
        None => (rest, Vec::new()),
    }
}
