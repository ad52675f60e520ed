//! Boards, tracks and the access checks around them
//!
//! Persistence is owned elsewhere; the playback service only reads through
//! the [`Catalog`] trait and asks an [`AccessPolicy`] whether a caller may
//! act. [`InMemoryCatalog`] backs the server binary and the tests.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

pub type BoardId = u64;
pub type TrackId = u64;
pub type UserId = u64;

/// A user-owned playback target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(default)]
    pub selected_track_id: Option<TrackId>,
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub overplay: bool,
}

fn default_volume() -> u8 {
    50
}

/// A playable track reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    /// Source URI handed to the loader
    pub uri: String,
    pub duration_secs: u64,
    pub owner_id: UserId,
    /// Users the owner shared this track with
    #[serde(default)]
    pub shared_with: Vec<UserId>,
}

/// Read-only board/track lookup
pub trait Catalog: Send + Sync {
    fn board(&self, id: BoardId) -> Option<Board>;
    fn track(&self, id: TrackId) -> Option<Track>;
}

/// Authorization decisions
pub trait AccessPolicy: Send + Sync {
    fn may_control_board(&self, user: UserId, board: &Board) -> bool;
    fn may_play_track(&self, user: UserId, track: &Track) -> bool;
}

/// Owners control their boards; tracks are playable by their owner and by
/// users holding a share grant.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnershipPolicy;

impl AccessPolicy for OwnershipPolicy {
    fn may_control_board(&self, user: UserId, board: &Board) -> bool {
        board.owner_id == user
    }

    fn may_play_track(&self, user: UserId, track: &Track) -> bool {
        track.owner_id == user || track.shared_with.contains(&user)
    }
}

/// Seed file layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogSeed {
    #[serde(default)]
    boards: Vec<Board>,
    #[serde(default)]
    tracks: Vec<Track>,
}

/// Concurrent in-memory catalog
#[derive(Default)]
pub struct InMemoryCatalog {
    boards: DashMap<BoardId, Board>,
    tracks: DashMap<TrackId, Track>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `[[boards]]` / `[[tracks]]` tables
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let seed: CatalogSeed =
            toml::from_str(text).map_err(|e| Error::Config(format!("catalog: {}", e)))?;

        let catalog = Self::new();
        for track in seed.tracks {
            catalog.insert_track(track);
        }
        for board in seed.boards {
            if let Some(selected) = board.selected_track_id {
                if !catalog.tracks.contains_key(&selected) {
                    return Err(Error::Config(format!(
                        "catalog: board {} selects unknown track {}",
                        board.id, selected
                    )));
                }
            }
            catalog.insert_board(board);
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn insert_board(&self, board: Board) {
        self.boards.insert(board.id, board);
    }

    pub fn insert_track(&self, track: Track) {
        self.tracks.insert(track.id, track);
    }

    pub fn board_count(&self) -> usize {
        self.boards.len()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

impl Catalog for InMemoryCatalog {
    fn board(&self, id: BoardId) -> Option<Board> {
        self.boards.get(&id).map(|b| b.clone())
    }

    fn track(&self, id: TrackId) -> Option<Track> {
        self.tracks.get(&id).map(|t| t.clone())
    }
}
