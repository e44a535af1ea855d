use sleepy_proto::protocol::{PlaylistConfig, State};
use tracing::{debug, info};

/// Everything the controller remembers between state handlers.
///
/// Mutators are visible to the controller module only, so no other
/// component can move the machine.
#[derive(Debug)]
pub struct StateContext {
    state: State,
    selected: Option<PlaylistConfig>,
    cursor: usize,
    pending_content_ref: Option<String>,
    download_requested: bool,
    history: Vec<State>,
}

impl Default for StateContext {
    fn default() -> Self {
        Self::new()
    }
}

impl StateContext {
    pub fn new() -> Self {
        Self {
            state: State::Init,
            selected: None,
            cursor: 0,
            pending_content_ref: None,
            download_requested: false,
            history: vec![State::Init],
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn selected(&self) -> Option<&PlaylistConfig> {
        self.selected.as_ref()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn pending_content_ref(&self) -> Option<&str> {
        self.pending_content_ref.as_deref()
    }

    pub fn download_requested(&self) -> bool {
        self.download_requested
    }

    /// Every state entered so far, starting with `Init`.
    pub fn history(&self) -> &[State] {
        &self.history
    }

    pub(super) fn transition(&mut self, next: State) {
        info!("State changed to {}", next);
        self.state = next;
        self.history.push(next);
    }

    /// Replaces the selection; the cursor always starts over.
    pub(super) fn select_playlist(&mut self, playlist: Option<PlaylistConfig>) {
        debug!(
            "Selected playlist changed to {:?}",
            playlist.as_ref().map(|p| p.name.as_str())
        );
        self.selected = playlist;
        self.cursor = 0;
    }

    pub(super) fn advance_cursor(&mut self) {
        self.cursor += 1;
    }

    pub(super) fn record_pending(&mut self, content_ref: String) {
        debug!("Content ref changed to {}", content_ref);
        self.pending_content_ref = Some(content_ref);
        self.download_requested = false;
    }

    pub(super) fn request_download(&mut self) {
        debug!("Download flag set");
        self.download_requested = true;
    }

    /// The pending reference, if a download was requested for it.
    pub(super) fn take_download(&mut self) -> Option<String> {
        if !std::mem::take(&mut self.download_requested) {
            return None;
        }
        self.pending_content_ref.take()
    }

    pub(super) fn clear_pending(&mut self) {
        self.pending_content_ref = None;
        self.download_requested = false;
    }
}
