//! The appliance state machine.
//!
//! ```text
//!   Init ──► Select ◄──────────────┐
//!    │        │  ▲                 │ reselect
//!    │        ▼  │ empty / reselect│
//!    │       Play ─────────────────┘
//!    │        │ natural + shutdown_after_play
//!    │        ▼
//!    │       Wait ──► Shutdown ──► Quit
//!    └──────────────────────────────▲  (auth failure, quit key, any error)
//! ```
//!
//! The controller owns the [`StateContext`] and is the only place that moves
//! it.  Each `step` runs the handler of the current state; an error escaping
//! a handler forces `Quit`.

mod state;

pub use state::StateContext;

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use sleepy_proto::config::Config;
use sleepy_proto::protocol::{Action, PlaybackOutcome, PlaylistConfig, QueueItem, SourceKind, State};
use sleepy_proto::router::ActionRouter;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::audio::{Cue, CuePlayer};
use crate::download::Downloader;
use crate::keys::KeyInput;
use crate::monitor::{EpisodeRunner, MonitorError, RenderCommand};
use crate::power::PowerControl;
use crate::source::{choose_index, PlaylistSource, RemoteConnector, ResolvedQueue};
use crate::youtube::auth::AuthError;

/// Poll interval of the unbounded Select wait, also the key window left
/// open after a renderer fails to start.
const SELECT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("remote authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("keyboard unavailable: {0}")]
    Keyboard(#[source] io::Error),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error("playlist {0:?} is remote but no remote provider is connected")]
    RemoteUnavailable(String),
}

/// External capabilities the controller drives.
pub struct Collaborators {
    pub keys: Box<dyn KeyInput>,
    pub episodes: Box<dyn EpisodeRunner>,
    pub cues: Box<dyn CuePlayer>,
    pub remote: Box<dyn RemoteConnector>,
    pub local: Arc<dyn PlaylistSource>,
    pub downloader: Box<dyn Downloader>,
    pub power: Box<dyn PowerControl>,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub remote_renderer: Vec<String>,
    pub local_renderer: Vec<String>,
    pub power_delay: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            remote_renderer: config.renderer.remote.clone(),
            local_renderer: config.renderer.local.clone(),
            power_delay: Duration::from_secs(config.power.delay_secs),
        }
    }
}

pub struct Controller {
    ctx: StateContext,
    playlists: BTreeMap<char, PlaylistConfig>,
    router: ActionRouter,
    settings: ControllerSettings,
    keys: Box<dyn KeyInput>,
    episodes: Box<dyn EpisodeRunner>,
    cues: Box<dyn CuePlayer>,
    connector: Box<dyn RemoteConnector>,
    local: Arc<dyn PlaylistSource>,
    downloader: Box<dyn Downloader>,
    power: Box<dyn PowerControl>,
    /// Set once Init has authenticated the provider.
    remote: Option<Arc<dyn PlaylistSource>>,
    /// Source serving the selected playlist, fixed for the whole Play run.
    queue: Option<ResolvedQueue>,
    /// Renderer start failures in a row; a second one abandons the queue.
    spawn_failures: u32,
    rng: StdRng,
}

impl Controller {
    pub fn new(
        playlists: BTreeMap<char, PlaylistConfig>,
        router: ActionRouter,
        settings: ControllerSettings,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            keys,
            episodes,
            cues,
            remote,
            local,
            downloader,
            power,
        } = collaborators;
        Self {
            ctx: StateContext::new(),
            playlists,
            router,
            settings,
            keys,
            episodes,
            cues,
            connector: remote,
            local,
            downloader,
            power,
            remote: None,
            queue: None,
            spawn_failures: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn context(&self) -> &StateContext {
        &self.ctx
    }

    /// Drives the machine until `Quit`.  Only a failure during `Init` is
    /// returned; later errors are logged and end the session normally.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        let mut fatal = None;
        while self.ctx.state() != State::Quit {
            let current = self.ctx.state();
            if let Err(e) = self.step().await {
                error!("Error in state {}: {}", current, e);
                if current == State::Init {
                    fatal = Some(e);
                }
                self.ctx.transition(State::Quit);
            }
        }
        self.quit().await;
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn step(&mut self) -> Result<(), ControllerError> {
        match self.ctx.state() {
            State::Init => self.init().await,
            State::Select => self.select().await,
            State::Play => self.play().await,
            State::Wait => self.wait().await,
            State::Shutdown => self.shutdown().await,
            State::Quit => Ok(()),
        }
    }

    // ── state handlers ────────────────────────────────────────────────────────

    async fn init(&mut self) -> Result<(), ControllerError> {
        info!("Initializing application");
        self.cues.play(Cue::Up).await;

        let needs_remote = self
            .playlists
            .values()
            .any(|p| !p.source_kind().is_local());
        if needs_remote {
            let source = self.connector.connect(self.cues.as_mut()).await?;
            self.remote = Some(source);
        } else {
            info!("No remote playlists configured, skipping authentication");
        }

        self.ctx.transition(State::Select);
        Ok(())
    }

    async fn select(&mut self) -> Result<(), ControllerError> {
        info!("Waiting for playlist selection");
        self.ctx.select_playlist(None);
        self.queue = None;
        self.spawn_failures = 0;
        self.cues.play(Cue::Ping).await;

        loop {
            let key = self.wait_for_key().await?;

            if let Some(playlist) = self.playlists.get(&key).cloned() {
                info!("Selected playlist: {}", playlist.name);
                self.queue = Some(self.resolve(&playlist)?);
                self.ctx.select_playlist(Some(playlist));
                self.ctx.transition(State::Play);
                self.cues.play(Cue::Ok).await;
                return Ok(());
            }

            match self.router.route(key) {
                Some(Action::Shutdown) => {
                    self.ctx.transition(State::Shutdown);
                    return Ok(());
                }
                Some(Action::Quit) => {
                    self.ctx.transition(State::Quit);
                    return Ok(());
                }
                // Re-enter Select: prompt again with a clean selection.
                Some(Action::Reselect | Action::Skip) => return Ok(()),
                Some(Action::SkipWithSideEffect(_)) => {
                    debug!("ignoring flag key {:?} outside playback", key)
                }
                None => {
                    warn!("Invalid key: {:?}", key);
                    self.cues.play(Cue::Error).await;
                }
            }
        }
    }

    async fn play(&mut self) -> Result<(), ControllerError> {
        let (Some(playlist), Some(queue)) = (self.ctx.selected().cloned(), self.queue.clone())
        else {
            error!("No playlist selected");
            self.ctx.transition(State::Select);
            return Ok(());
        };

        let Some((index, item)) = self.next_item(&playlist, &queue).await else {
            self.cues.play(Cue::Error).await;
            self.ctx.transition(State::Select);
            return Ok(());
        };

        info!("Now playing item {}: {} ({})", index, item.title, item.content_ref);
        self.ctx.record_pending(item.content_ref.clone());
        let command = RenderCommand::from_template(&queue.renderer, &item.content_ref);
        let outcome = self.run_episode(&command).await?;

        if self.spawn_failures > 1 && outcome.completed_naturally() {
            error!(
                "Renderer failed to start {} times in a row, leaving playlist {}",
                self.spawn_failures, playlist.name
            );
            self.ctx.clear_pending();
            self.ctx.transition(State::Select);
            return Ok(());
        }
        self.finish_episode(&playlist, &queue, &item, outcome).await;
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), ControllerError> {
        info!("Waiting before shutdown");
        let command = self.cues.episode_command(Cue::Wait);
        let outcome = self.run_episode(&command).await?;

        match outcome.termination_action {
            None => {
                self.cues.set_muted(true);
                self.ctx.transition(State::Shutdown);
            }
            Some(Action::Skip | Action::SkipWithSideEffect(_)) => {
                info!("Shutdown cancelled, continuing playlist");
                self.ctx.transition(State::Play);
            }
            Some(Action::Reselect) => self.ctx.transition(State::Select),
            Some(Action::Shutdown) => self.ctx.transition(State::Shutdown),
            Some(Action::Quit) => self.ctx.transition(State::Quit),
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ControllerError> {
        info!("Shutting down");
        self.cues.play(Cue::Shutdown).await;
        match self.power.shutdown(self.settings.power_delay) {
            Ok(()) => self.cues.set_muted(true),
            Err(e) => error!("Shutdown command failed: {:#}", e),
        }
        self.ctx.transition(State::Quit);
        Ok(())
    }

    async fn quit(&mut self) {
        info!("Exiting application");
        if self.cues.is_muted() {
            debug!("audio muted, exiting silently");
        }
        self.cues.play(Cue::Down).await;
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn wait_for_key(&mut self) -> Result<char, ControllerError> {
        let mut session = self.keys.open().map_err(ControllerError::Keyboard)?;
        loop {
            if let Some(key) = session
                .poll_key(SELECT_POLL)
                .await
                .map_err(ControllerError::Keyboard)?
            {
                return Ok(key);
            }
        }
    }

    /// Runs one monitored episode.  A renderer that cannot start counts as
    /// played to completion, after an error cue, unless a terminating key
    /// arrives within one poll of the failure.
    async fn run_episode(
        &mut self,
        command: &RenderCommand,
    ) -> Result<PlaybackOutcome, ControllerError> {
        let mut session = self.keys.open().map_err(ControllerError::Keyboard)?;
        let spawn_error = match self.episodes.run(command, session.as_mut()).await {
            Ok(outcome) => {
                self.spawn_failures = 0;
                return Ok(outcome);
            }
            Err(MonitorError::Spawn(e)) => e,
            Err(e) => return Err(e.into()),
        };

        error!("{}", spawn_error);
        self.spawn_failures += 1;
        self.cues.play(Cue::Error).await;

        let key = session
            .poll_key(SELECT_POLL)
            .await
            .map_err(ControllerError::Keyboard)?;
        match key.and_then(|k| self.router.route(k)) {
            Some(action) if action.is_terminating() => {
                info!("{:?} pressed after renderer failure", action);
                Ok(PlaybackOutcome::terminated(action, false))
            }
            _ => Ok(PlaybackOutcome::natural(false)),
        }
    }

    fn resolve(&self, playlist: &PlaylistConfig) -> Result<ResolvedQueue, ControllerError> {
        let kind = playlist.source_kind();
        let (source, locator, renderer) = match &kind {
            SourceKind::Local(path) => (
                Arc::clone(&self.local),
                path.to_string_lossy().into_owned(),
                self.settings.local_renderer.clone(),
            ),
            SourceKind::Remote(id) => {
                let source = self
                    .remote
                    .clone()
                    .ok_or_else(|| ControllerError::RemoteUnavailable(playlist.name.clone()))?;
                (source, id.clone(), self.settings.remote_renderer.clone())
            }
        };
        Ok(ResolvedQueue {
            source,
            locator,
            kind,
            renderer,
        })
    }

    /// Picks the next item.  Listing failures, empty queues and vanished
    /// indices all come back as `None`.
    async fn next_item(
        &mut self,
        playlist: &PlaylistConfig,
        queue: &ResolvedQueue,
    ) -> Option<(usize, QueueItem)> {
        let count = match queue.source.count(&queue.locator).await {
            Ok(count) => count,
            Err(e) => {
                error!("Failed to list playlist {}: {}", playlist.name, e);
                return None;
            }
        };
        if count == 0 {
            warn!("Playlist is empty: {}", playlist.name);
            return None;
        }

        let index = choose_index(count, playlist, self.ctx.cursor(), &mut self.rng);
        match queue.source.item_at(&queue.locator, index).await {
            Ok(Some(item)) => Some((index, item)),
            Ok(None) => {
                warn!("Failed to fetch playlist item at index {}", index);
                None
            }
            Err(e) => {
                error!("Failed to fetch playlist item at index {}: {}", index, e);
                None
            }
        }
    }

    /// Applies deferred side effects in order: delete (natural completion
    /// only), cursor, download, then the next state.
    async fn finish_episode(
        &mut self,
        playlist: &PlaylistConfig,
        queue: &ResolvedQueue,
        item: &QueueItem,
        outcome: PlaybackOutcome,
    ) {
        let wants_download = outcome.side_effect_triggered
            || (playlist.download_after_play && outcome.completed_naturally());
        if wants_download {
            if queue.is_remote() {
                self.ctx.request_download();
            } else {
                debug!("download not applicable to local item {}", item.title);
            }
        }

        match outcome.termination_action {
            None => {
                let deleted = playlist.delete_after_play && self.remove_item(queue, item).await;
                if !deleted {
                    self.ctx.advance_cursor();
                }
                self.run_download().await;
                if playlist.shutdown_after_play {
                    self.ctx.transition(State::Wait);
                }
            }
            Some(Action::Skip | Action::SkipWithSideEffect(_)) => {
                self.ctx.advance_cursor();
                self.run_download().await;
            }
            Some(Action::Reselect) => {
                self.run_download().await;
                self.ctx.transition(State::Select);
            }
            Some(action @ (Action::Shutdown | Action::Quit)) => {
                if let Some(url) = self
                    .ctx
                    .pending_content_ref()
                    .filter(|_| self.ctx.download_requested())
                {
                    info!("Discarding pending download of {}", url);
                }
                let next = if action == Action::Shutdown {
                    State::Shutdown
                } else {
                    State::Quit
                };
                self.ctx.transition(next);
            }
        }
        self.ctx.clear_pending();
    }

    async fn remove_item(&self, queue: &ResolvedQueue, item: &QueueItem) -> bool {
        match queue.source.remove(&queue.locator, &item.item_ref).await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Failed to remove {}: {}", item.title, e);
                false
            }
        }
    }

    async fn run_download(&mut self) {
        let Some(url) = self.ctx.take_download() else {
            return;
        };
        if let Err(e) = self.downloader.download(&url).await {
            warn!("Download of {} failed: {:#}", url, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::RecordingCues;
    use crate::download::testing::RecordingDownloader;
    use crate::keys::testing::ScriptedKeys;
    use crate::keys::KeySource;
    use crate::monitor::SpawnError;
    use crate::power::testing::FakePower;
    use crate::source::testing::MemorySource;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Hands back prepared outcomes and records what it was asked to play.
    /// Running dry reports a keyboard failure, which ends the session, or a
    /// spawn failure when the renderer is missing altogether.
    struct ScriptedEpisodes {
        outcomes: VecDeque<Result<PlaybackOutcome, MonitorError>>,
        commands: Arc<Mutex<Vec<RenderCommand>>>,
        renderer_missing: bool,
    }

    #[async_trait]
    impl EpisodeRunner for ScriptedEpisodes {
        async fn run(
            &mut self,
            command: &RenderCommand,
            _keys: &mut dyn KeySource,
        ) -> Result<PlaybackOutcome, MonitorError> {
            self.commands.lock().unwrap().push(command.clone());
            if let Some(outcome) = self.outcomes.pop_front() {
                return outcome;
            }
            if self.renderer_missing {
                return spawn_failure();
            }
            Err(MonitorError::Keyboard(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "episode script exhausted",
            )))
        }
    }

    fn spawn_failure() -> Result<PlaybackOutcome, MonitorError> {
        Err(MonitorError::Spawn(SpawnError {
            program: PathBuf::from("aplay"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        }))
    }

    struct FakeConnector {
        source: MemorySource,
        fail: bool,
        connects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteConnector for FakeConnector {
        async fn connect(
            &mut self,
            _cues: &mut dyn CuePlayer,
        ) -> Result<Arc<dyn PlaylistSource>, AuthError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::Denied);
            }
            Ok(Arc::new(self.source.clone()))
        }
    }

    struct Harness {
        cues: RecordingCues,
        downloads: RecordingDownloader,
        power: FakePower,
        commands: Arc<Mutex<Vec<RenderCommand>>>,
        connects: Arc<AtomicUsize>,
        key_sessions: Arc<AtomicUsize>,
    }

    impl Harness {
        /// Content references handed to the renderer, in order.
        fn played(&self) -> Vec<String> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| c.args.last().cloned())
                .collect()
        }
    }

    struct Setup {
        playlists: Vec<PlaylistConfig>,
        keys: Vec<(Duration, char)>,
        outcomes: Vec<Result<PlaybackOutcome, MonitorError>>,
        source: MemorySource,
        auth_fails: bool,
        power_fails: bool,
        renderer_missing: bool,
    }

    impl Setup {
        fn new(playlists: Vec<PlaylistConfig>, source: MemorySource) -> Self {
            Self {
                playlists,
                keys: vec![],
                outcomes: vec![],
                source,
                auth_fails: false,
                power_fails: false,
                renderer_missing: false,
            }
        }

        fn keys(mut self, keys: &[char]) -> Self {
            self.keys = keys.iter().map(|k| (Duration::ZERO, *k)).collect();
            self
        }

        fn timed_keys(mut self, keys: Vec<(Duration, char)>) -> Self {
            self.keys = keys;
            self
        }

        fn outcomes(mut self, outcomes: Vec<Result<PlaybackOutcome, MonitorError>>) -> Self {
            self.outcomes = outcomes;
            self
        }

        fn build(self) -> (Controller, Harness) {
            let cues = RecordingCues::default();
            let downloads = RecordingDownloader::default();
            let power = FakePower {
                fail: self.power_fails,
                ..FakePower::default()
            };
            let commands = Arc::new(Mutex::new(Vec::new()));
            let connects = Arc::new(AtomicUsize::new(0));
            let keys = ScriptedKeys::timed(self.keys);
            let key_sessions = keys.session_counter();

            let playlists = self
                .playlists
                .into_iter()
                .filter_map(|p| p.key.chars().next().map(|k| (k, p)))
                .collect();
            let settings = ControllerSettings {
                remote_renderer: vec!["mpv".to_string(), "--no-video".to_string()],
                local_renderer: vec!["aplay".to_string()],
                power_delay: Duration::from_secs(60),
            };
            let collaborators = Collaborators {
                keys: Box::new(keys),
                episodes: Box::new(ScriptedEpisodes {
                    outcomes: self.outcomes.into(),
                    commands: commands.clone(),
                    renderer_missing: self.renderer_missing,
                }),
                cues: Box::new(cues.clone()),
                remote: Box::new(FakeConnector {
                    source: self.source.clone(),
                    fail: self.auth_fails,
                    connects: connects.clone(),
                }),
                local: Arc::new(self.source),
                downloader: Box::new(downloads.clone()),
                power: Box::new(power.clone()),
            };
            let controller =
                Controller::new(playlists, ActionRouter::default(), settings, collaborators);
            (
                controller,
                Harness {
                    cues,
                    downloads,
                    power,
                    commands,
                    connects,
                    key_sessions,
                },
            )
        }
    }

    fn playlist(key: &str, locator: &str) -> PlaylistConfig {
        PlaylistConfig {
            key: key.to_string(),
            name: format!("Playlist {}", key),
            locator: locator.to_string(),
            randomize: false,
            delete_after_play: false,
            shutdown_after_play: false,
            download_after_play: false,
            sequential: false,
        }
    }

    fn url(id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", id)
    }

    fn natural() -> Result<PlaybackOutcome, MonitorError> {
        Ok(PlaybackOutcome::natural(false))
    }

    fn terminated(action: Action, flagged: bool) -> Result<PlaybackOutcome, MonitorError> {
        Ok(PlaybackOutcome::terminated(action, flagged))
    }

    #[tokio::test]
    async fn test_invalid_keys_each_fire_one_error_cue() {
        let (mut controller, h) = Setup::new(
            vec![playlist("0", "/srv/asmr")],
            MemorySource::with_items(&["a"]),
        )
        .keys(&['x', 'q', '9', '/'])
        .build();

        controller.run().await.unwrap();

        assert_eq!(h.cues.count(Cue::Error), 3);
        assert_eq!(
            h.cues.played(),
            vec![Cue::Up, Cue::Ping, Cue::Error, Cue::Error, Cue::Error, Cue::Down]
        );
        assert_eq!(
            controller.context().history(),
            &[State::Init, State::Select, State::Quit]
        );
        // local-only configuration never authenticates
        assert_eq!(h.connects.load(Ordering::SeqCst), 0);
        // one session for the whole Select wait
        assert_eq!(h.key_sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_after_natural_completion() {
        let mut p = playlist("0", "/srv/asmr");
        p.delete_after_play = true;
        let source = MemorySource::with_items(&["a", "b", "c"]);
        let (mut controller, h) = Setup::new(vec![p], source.clone())
            .keys(&['0'])
            .outcomes(vec![natural(), natural()])
            .build();

        controller.run().await.unwrap();

        assert_eq!(h.played(), vec![url("a"), url("b"), url("c")]);
        // third episode ended with the keyboard failure, nothing removed
        assert_eq!(source.titles(), vec!["c"]);
        assert_eq!(h.cues.played()[..3], [Cue::Up, Cue::Ping, Cue::Ok]);
        assert_eq!(controller.context().state(), State::Quit);
        // Select wait plus one session per episode
        assert_eq!(h.key_sessions.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_shutdown_key_discards_side_effects() {
        let mut p = playlist("0", "PLremote");
        p.delete_after_play = true;
        p.download_after_play = true;
        let source = MemorySource::with_items(&["a", "b"]);
        let (mut controller, h) = Setup::new(vec![p], source.clone())
            .keys(&['0'])
            .outcomes(vec![terminated(Action::Shutdown, true)])
            .build();

        controller.run().await.unwrap();

        assert_eq!(source.titles(), vec!["a", "b"]);
        assert!(h.downloads.urls().is_empty());
        assert_eq!(h.power.requests(), vec![Duration::from_secs(60)]);
        assert_eq!(
            controller.context().history(),
            &[
                State::Init,
                State::Select,
                State::Play,
                State::Shutdown,
                State::Quit
            ]
        );
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);
        // muted once power-off was requested
        assert_eq!(h.cues.played().last(), Some(&Cue::Shutdown));
    }

    #[tokio::test]
    async fn test_shutdown_after_play_goes_through_wait() {
        let mut p = playlist("0", "PLremote");
        p.shutdown_after_play = true;
        let (mut controller, h) = Setup::new(vec![p], MemorySource::with_items(&["only"]))
            .keys(&['0'])
            .outcomes(vec![natural(), natural()])
            .build();

        controller.run().await.unwrap();

        assert_eq!(
            controller.context().history(),
            &[
                State::Init,
                State::Select,
                State::Play,
                State::Wait,
                State::Shutdown,
                State::Quit
            ]
        );
        let played = h.played();
        assert_eq!(played[0], url("only"));
        assert_eq!(played[1], "sounds/wait.wav");
        assert_eq!(h.power.requests().len(), 1);
        // muted after the wait cue, so neither shutdown nor down is heard
        assert_eq!(h.cues.played(), vec![Cue::Up, Cue::Ping, Cue::Ok]);
    }

    #[tokio::test]
    async fn test_skip_during_wait_resumes_playlist() {
        let mut p = playlist("0", "PLremote");
        p.shutdown_after_play = true;
        let (mut controller, h) =
            Setup::new(vec![p], MemorySource::with_items(&["a", "b"]))
                .keys(&['0'])
                .outcomes(vec![natural(), terminated(Action::Skip, false)])
                .build();

        controller.run().await.unwrap();

        assert_eq!(
            controller.context().history()[..5],
            [
                State::Init,
                State::Select,
                State::Play,
                State::Wait,
                State::Play
            ]
        );
        assert!(h.power.requests().is_empty());
        assert_eq!(h.played().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_key_during_wait() {
        let mut p = playlist("0", "PLremote");
        p.shutdown_after_play = true;
        let (mut controller, h) =
            Setup::new(vec![p], MemorySource::with_items(&["a", "b"]))
                .keys(&['0'])
                .outcomes(vec![natural(), terminated(Action::Shutdown, false)])
                .build();

        controller.run().await.unwrap();

        assert_eq!(
            controller.context().history(),
            &[
                State::Init,
                State::Select,
                State::Play,
                State::Wait,
                State::Shutdown,
                State::Quit
            ]
        );
        assert_eq!(h.power.requests(), vec![Duration::from_secs(60)]);
        assert_eq!(
            h.cues.played(),
            vec![Cue::Up, Cue::Ping, Cue::Ok, Cue::Shutdown]
        );
    }

    #[tokio::test]
    async fn test_quit_key_during_wait() {
        let mut p = playlist("0", "PLremote");
        p.shutdown_after_play = true;
        let (mut controller, h) =
            Setup::new(vec![p], MemorySource::with_items(&["a", "b"]))
                .keys(&['0'])
                .outcomes(vec![natural(), terminated(Action::Quit, false)])
                .build();

        controller.run().await.unwrap();

        assert_eq!(
            controller.context().history(),
            &[
                State::Init,
                State::Select,
                State::Play,
                State::Wait,
                State::Quit
            ]
        );
        assert!(h.power.requests().is_empty());
        assert_eq!(h.cues.played().last(), Some(&Cue::Down));
    }

    #[tokio::test]
    async fn test_reselect_restarts_cursor() {
        let mut p = playlist("0", "/srv/asmr");
        p.sequential = true;
        let (mut controller, h) =
            Setup::new(vec![p], MemorySource::with_items(&["a", "b", "c"]))
                .keys(&['0', '0'])
                .outcomes(vec![natural(), terminated(Action::Reselect, false), natural()])
                .build();

        controller.run().await.unwrap();

        assert_eq!(
            h.played(),
            vec![url("a"), url("b"), url("a"), url("b")]
        );
        assert_eq!(h.cues.count(Cue::Ping), 2);
    }

    #[tokio::test]
    async fn test_flagged_skip_downloads_without_deleting() {
        let mut p = playlist("0", "youtube:PLremote");
        p.delete_after_play = true;
        let source = MemorySource::with_items(&["a", "b"]);
        let (mut controller, h) = Setup::new(vec![p], source.clone())
            .keys(&['0'])
            .outcomes(vec![terminated(Action::Skip, true)])
            .build();

        controller.run().await.unwrap();

        assert_eq!(h.downloads.urls(), vec![url("a")]);
        assert_eq!(source.titles(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_download_after_play_on_natural_completion() {
        let mut p = playlist("0", "PLremote");
        p.download_after_play = true;
        let (mut controller, h) = Setup::new(vec![p], MemorySource::with_items(&["a"]))
            .keys(&['0'])
            .outcomes(vec![natural(), terminated(Action::Skip, false)])
            .build();

        controller.run().await.unwrap();

        // skip without the flag downloads nothing
        assert_eq!(h.downloads.urls(), vec![url("a")]);
    }

    #[tokio::test]
    async fn test_flag_on_local_item_is_ignored() {
        let (mut controller, h) = Setup::new(
            vec![playlist("0", "/srv/asmr")],
            MemorySource::with_items(&["a"]),
        )
        .keys(&['0'])
        .outcomes(vec![Ok(PlaybackOutcome::natural(true))])
        .build();

        controller.run().await.unwrap();

        assert!(h.downloads.urls().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_counts_as_completed() {
        let mut p = playlist("0", "/srv/asmr");
        p.delete_after_play = true;
        let source = MemorySource::with_items(&["a", "b"]);
        let (mut controller, h) = Setup::new(vec![p], source.clone())
            .timed_keys(vec![
                (Duration::ZERO, '0'),
                (Duration::from_secs(10), '/'),
            ])
            .outcomes(vec![spawn_failure()])
            .build();

        controller.run().await.unwrap();

        assert_eq!(source.titles(), vec!["b"]);
        assert_eq!(h.cues.count(Cue::Error), 1);
        assert_eq!(h.key_sessions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_key_is_read_when_renderer_cannot_start() {
        let mut setup = Setup::new(
            vec![playlist("0", "/srv/asmr")],
            MemorySource::with_items(&["a", "b"]),
        );
        setup.renderer_missing = true;
        let (mut controller, h) = setup.keys(&['0', '*']).build();

        tokio::time::timeout(Duration::from_secs(2), controller.run())
            .await
            .expect("controller kept looping on a missing renderer")
            .unwrap();

        assert_eq!(
            controller.context().history(),
            &[
                State::Init,
                State::Select,
                State::Play,
                State::Shutdown,
                State::Quit
            ]
        );
        assert_eq!(h.power.requests().len(), 1);
        assert_eq!(h.cues.count(Cue::Error), 1);
    }

    #[tokio::test]
    async fn test_repeated_spawn_failures_return_to_select() {
        let mut p = playlist("0", "/srv/asmr");
        p.delete_after_play = true;
        let source = MemorySource::with_items(&["a", "b", "c"]);
        let mut setup = Setup::new(vec![p], source.clone()).timed_keys(vec![
            (Duration::ZERO, '0'),
            (Duration::from_secs(1), '/'),
        ]);
        setup.renderer_missing = true;
        let (mut controller, h) = setup.build();

        tokio::time::timeout(Duration::from_secs(5), controller.run())
            .await
            .expect("controller kept looping on a missing renderer")
            .unwrap();

        assert_eq!(
            controller.context().history(),
            &[
                State::Init,
                State::Select,
                State::Play,
                State::Select,
                State::Quit
            ]
        );
        assert_eq!(h.played(), vec![url("a"), url("b")]);
        // only the first failure is treated as a completed item
        assert_eq!(source.titles(), vec!["b", "c"]);
        assert_eq!(h.cues.count(Cue::Error), 2);
        assert_eq!(h.cues.count(Cue::Ping), 2);
    }

    #[tokio::test]
    async fn test_empty_queue_returns_to_select() {
        let (mut controller, h) = Setup::new(
            vec![playlist("0", "/srv/asmr")],
            MemorySource::with_items(&[]),
        )
        .keys(&['0', '/'])
        .build();

        controller.run().await.unwrap();

        assert_eq!(
            controller.context().history(),
            &[
                State::Init,
                State::Select,
                State::Play,
                State::Select,
                State::Quit
            ]
        );
        assert_eq!(h.cues.count(Cue::Error), 1);
        assert!(h.played().is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_returns_to_select() {
        let mut source = MemorySource::with_items(&["a"]);
        source.fail_listing = true;
        let (mut controller, h) = Setup::new(vec![playlist("0", "/srv/asmr")], source)
            .keys(&['0', '/'])
            .build();

        controller.run().await.unwrap();

        assert_eq!(h.cues.count(Cue::Error), 1);
        assert_eq!(controller.context().state(), State::Quit);
    }

    #[tokio::test]
    async fn test_auth_failure_quits_with_error() {
        let mut setup = Setup::new(
            vec![playlist("0", "PLremote")],
            MemorySource::with_items(&["a"]),
        );
        setup.auth_fails = true;
        let (mut controller, h) = setup.keys(&['0']).build();

        let result = controller.run().await;

        assert!(matches!(result, Err(ControllerError::Auth(AuthError::Denied))));
        assert_eq!(controller.context().history(), &[State::Init, State::Quit]);
        assert_eq!(h.cues.played(), vec![Cue::Up, Cue::Down]);
    }

    #[tokio::test]
    async fn test_failed_power_off_still_quits_once() {
        let mut setup = Setup::new(
            vec![playlist("0", "/srv/asmr")],
            MemorySource::with_items(&["a"]),
        );
        setup.power_fails = true;
        let (mut controller, h) = setup.keys(&['*']).build();

        controller.run().await.unwrap();

        let history = controller.context().history();
        assert_eq!(
            history,
            &[State::Init, State::Select, State::Shutdown, State::Quit]
        );
        assert_eq!(history.iter().filter(|s| **s == State::Quit).count(), 1);
        assert_eq!(h.power.requests().len(), 1);
        // not muted when the power-off request failed
        assert_eq!(h.cues.played().last(), Some(&Cue::Down));
    }

    #[tokio::test]
    async fn test_keyboard_failure_in_select_quits_cleanly() {
        let (mut controller, h) = Setup::new(
            vec![playlist("0", "/srv/asmr")],
            MemorySource::with_items(&["a"]),
        )
        .build();

        controller.run().await.unwrap();

        assert_eq!(
            controller.context().history(),
            &[State::Init, State::Select, State::Quit]
        );
        assert_eq!(h.cues.played().last(), Some(&Cue::Down));
    }
}
