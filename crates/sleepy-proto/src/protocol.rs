use std::fmt;
use std::path::PathBuf;

/// Controller states.
///
/// Transitions:
///   Init -> Select | Quit
///   Select -> Select | Play | Shutdown | Quit
///   Play -> Play | Select | Wait | Shutdown | Quit
///   Wait -> Shutdown | Play | Select | Quit
///   Shutdown -> Quit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Init,
    Select,
    Play,
    Wait,
    Shutdown,
    Quit,
}

impl State {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Select => "select",
            Self::Play => "play",
            Self::Wait => "wait",
            Self::Shutdown => "shutdown",
            Self::Quit => "quit",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Deferred work recorded by a non-terminating key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideEffect {
    /// Hand the current item to the downloader once the episode is over.
    Download,
}

/// Semantic meaning of a reserved key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Shutdown,
    Quit,
    Reselect,
    Skip,
    /// Non-terminating: playback keeps running, only the flag is recorded.
    SkipWithSideEffect(SideEffect),
}

impl Action {
    /// True for keys that end the current episode immediately.
    pub fn is_terminating(&self) -> bool {
        !matches!(self, Self::SkipWithSideEffect(_))
    }
}

/// How one episode ended. Produced exactly once per monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackOutcome {
    /// `None` when the renderer ran to natural completion.
    pub termination_action: Option<Action>,
    /// A non-terminating key was pressed at least once.
    pub side_effect_triggered: bool,
}

impl PlaybackOutcome {
    pub fn natural(side_effect_triggered: bool) -> Self {
        Self {
            termination_action: None,
            side_effect_triggered,
        }
    }

    pub fn terminated(action: Action, side_effect_triggered: bool) -> Self {
        Self {
            termination_action: Some(action),
            side_effect_triggered,
        }
    }

    pub fn completed_naturally(&self) -> bool {
        self.termination_action.is_none()
    }
}

/// One selectable queue, keyed by a single-character selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistConfig {
    pub key: String,
    pub name: String,
    pub locator: String,
    pub randomize: bool,
    pub delete_after_play: bool,
    pub shutdown_after_play: bool,
    pub download_after_play: bool,
    /// Traverse a non-randomized queue by cursor instead of always taking
    /// the head.
    pub sequential: bool,
}

impl PlaylistConfig {
    pub fn source_kind(&self) -> SourceKind {
        SourceKind::from_locator(&self.locator)
    }
}

/// Which PlaylistSource variant a locator addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Local(PathBuf),
    Remote(String),
}

impl SourceKind {
    /// Path-like locators and `file://` URLs are local directories; anything
    /// else is a remote playlist id (an optional `youtube:` prefix is
    /// stripped).
    pub fn from_locator(locator: &str) -> Self {
        let locator = locator.trim();
        if let Some(path) = locator.strip_prefix("file://") {
            return Self::Local(PathBuf::from(path));
        }
        if let Some(rest) = locator.strip_prefix("~/") {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            return Self::Local(home.join(rest));
        }
        if locator.starts_with('/') || locator.starts_with("./") || locator.starts_with("../") {
            return Self::Local(PathBuf::from(locator));
        }
        let id = locator.strip_prefix("youtube:").unwrap_or(locator);
        Self::Remote(id.to_string())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Opaque handle a source uses to remove an item it handed out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemRef(pub String);

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A playable entry fetched from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// File path or URL handed to the renderer.
    pub content_ref: String,
    pub title: String,
    pub item_ref: ItemRef,
}
