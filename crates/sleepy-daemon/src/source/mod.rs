//! Playlist sources.
//!
//! A queue is addressed by a locator string and served by one of two
//! variants: [`LocalSource`] (a directory) or [`RemoteSource`] (a paginated
//! provider API).  The variant is picked once, when a playlist is selected,
//! and held in a [`ResolvedQueue`] for the whole Play episode.

pub mod local;
pub mod remote;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use sleepy_proto::protocol::{ItemRef, PlaylistConfig, QueueItem, SourceKind};
use thiserror::Error;

pub use local::LocalSource;
pub use remote::{PlaylistProvider, ProviderError, RemoteSource};

use crate::audio::CuePlayer;
use crate::youtube::auth::AuthError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to access {path:?}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("remote playlist {locator:?}: {source}")]
    Remote {
        locator: String,
        #[source]
        source: ProviderError,
    },
}

#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn count(&self, locator: &str) -> Result<usize, SourceError>;

    /// `Ok(None)` when `index` is no longer reachable, e.g. the queue shrank
    /// since `count`.
    async fn item_at(&self, locator: &str, index: usize) -> Result<Option<QueueItem>, SourceError>;

    /// Returns whether the item was actually removed.
    async fn remove(&self, locator: &str, item: &ItemRef) -> Result<bool, SourceError>;
}

/// Establishes the remote variant.  May block on an interactive consent
/// step; `cues` lets it alert the operator first.
#[async_trait]
pub trait RemoteConnector: Send {
    async fn connect(
        &mut self,
        cues: &mut dyn CuePlayer,
    ) -> Result<Arc<dyn PlaylistSource>, AuthError>;
}

/// Which source and renderer serve the selected playlist.
#[derive(Clone)]
pub struct ResolvedQueue {
    pub source: Arc<dyn PlaylistSource>,
    pub locator: String,
    pub kind: SourceKind,
    /// argv template of the renderer for this queue's items.
    pub renderer: Vec<String>,
}

impl ResolvedQueue {
    pub fn is_remote(&self) -> bool {
        !self.kind.is_local()
    }
}

/// Index of the next item to play.
///
/// Randomized queues draw uniformly from `[0, count)` on every call;
/// sequential queues follow the cursor; everything else takes the head.
pub fn choose_index<R: Rng + ?Sized>(
    count: usize,
    playlist: &PlaylistConfig,
    cursor: usize,
    rng: &mut R,
) -> usize {
    if count == 0 {
        return 0;
    }
    if playlist.randomize {
        rng.gen_range(0..count)
    } else if playlist.sequential {
        cursor % count
    } else {
        0
    }
}
