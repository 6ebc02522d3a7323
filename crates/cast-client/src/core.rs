//! ClientCore: single-owner event loop for all mutable session state.
//!
//! The core owns the profile manager, the favorites reconciler and the
//! playback controller; nothing else touches them.  Pollers, the mpv event
//! bridge, artwork checks and the HTTP API only send `CoreEvent`s.  After each
//! event the core publishes a fresh `ViewState` on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use cast_proto::config::PollingConfig;
use cast_proto::playlist::{favorites_m3u, m3u_data_uri, xspf_download};
use cast_proto::profiles::{avatar_colors, ProfileError, ProfileManager};
use cast_proto::protocol::{ChannelId, Endpoints, MetadataResponse, Theme};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionReply};
use crate::app_state::{DownloadLink, PlaybackView, ProfileBadge, ViewState};
use crate::artwork::ArtTarget;
use crate::assets::AssetCache;
use crate::engine::EngineEvent;
use crate::favorites::FavoritesReconciler;
use crate::metadata::MetadataClient;
use crate::playback::{PlaybackController, StartOutcome};
use crate::poller::{fetch_favorites, spawn_active_poll, spawn_favorites_poll};
use crate::reorder::HOLD_TO_REORDER;
use crate::scheduler::ScheduledTask;

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the core loop.
pub enum CoreEvent {
    /// A command from the control surface, with an optional reply slot.
    Action {
        action: Action,
        reply: Option<oneshot::Sender<ActionReply>>,
    },
    Engine(EngineEvent),
    ActiveNowPlaying {
        channel: ChannelId,
        offset: u16,
        response: MetadataResponse,
    },
    FavoriteNowPlaying {
        channel: ChannelId,
        response: MetadataResponse,
    },
    /// A background artwork check found `url` unreachable.
    ArtworkFailed { target: ArtTarget, url: String },
    /// The reorder hold timer ran out.
    HoldElapsed,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub active: Duration,
    pub favorites: Duration,
}

impl PollIntervals {
    /// A zero period can't be scheduled; it falls back to the default.
    pub fn from_config(config: &PollingConfig) -> Self {
        let defaults = PollingConfig::default();
        let active_ms = nonzero_or(
            "active_interval_ms",
            config.active_interval_ms,
            defaults.active_interval_ms,
        );
        let favorites_secs = nonzero_or(
            "favorites_interval_secs",
            config.favorites_interval_secs,
            defaults.favorites_interval_secs,
        );
        Self {
            active: Duration::from_millis(active_ms),
            favorites: Duration::from_secs(favorites_secs),
        }
    }
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

fn nonzero_or(key: &str, value: u64, default: u64) -> u64 {
    if value == 0 {
        warn!("core: polling.{} = 0 is invalid, using {}", key, default);
        default
    } else {
        value
    }
}

// ── ClientCore ────────────────────────────────────────────────────────────────

pub struct ClientCore<C: MetadataClient> {
    profiles: ProfileManager,
    favorites: FavoritesReconciler,
    playback: PlaybackController,
    endpoints: Endpoints,
    client: Arc<C>,
    /// Used to check artwork reachability; `None` disables the checks.
    assets: Option<Arc<AssetCache>>,
    intervals: PollIntervals,
    theme: Theme,
    event_tx: mpsc::Sender<CoreEvent>,
    view_tx: watch::Sender<ViewState>,
    favorites_tx: watch::Sender<Vec<ChannelId>>,
    active_poll: Option<ScheduledTask>,
    favorites_poll: Option<ScheduledTask>,
}

impl<C: MetadataClient> ClientCore<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profiles: ProfileManager,
        favorites: FavoritesReconciler,
        playback: PlaybackController,
        endpoints: Endpoints,
        client: Arc<C>,
        assets: Option<Arc<AssetCache>>,
        intervals: PollIntervals,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> Self {
        let theme = profiles.backend().theme();
        let (favorites_tx, _) = watch::channel(Vec::new());
        let mut core = Self {
            profiles,
            favorites,
            playback,
            endpoints,
            client,
            assets,
            intervals,
            theme,
            event_tx,
            view_tx: watch::channel(ViewState::empty(theme)).0,
            favorites_tx,
            active_poll: None,
            favorites_poll: None,
        };
        let view = core.snapshot();
        core.view_tx.send_replace(view);
        core
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view_tx.subscribe()
    }

    /// Restore the stored session and start the favorites poll.
    pub fn start(&mut self) {
        match self.profiles.restore_session() {
            Some(p) => info!("core: restored session {} ({})", p.name, p.id),
            None => info!("core: no session, profile selection needed"),
        }
        self.favorites_poll = Some(spawn_favorites_poll(
            self.client.clone(),
            self.favorites_tx.subscribe(),
            self.intervals.favorites,
            self.event_tx.clone(),
        ));
        self.on_session_changed();
        self.publish();
    }

    /// Run until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("core: starting event loop");
        while let Some(event) = event_rx.recv().await {
            if !self.handle_event(event) {
                info!("core: shutdown requested");
                break;
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Returns false when the loop should stop.
    pub fn handle_event(&mut self, event: CoreEvent) -> bool {
        match event {
            CoreEvent::Shutdown => return false,

            CoreEvent::Action { action, reply } => {
                debug!("core: action {:?}", action);
                let outcome = self.dispatch(action);
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
                return true;
            }

            CoreEvent::Engine(event) => self.playback.on_engine_event(event),

            CoreEvent::ActiveNowPlaying {
                channel,
                offset,
                response,
            } => {
                let state = self.playback.state();
                if state.active_channel.as_deref() != Some(channel.as_str())
                    || state.offset != offset
                {
                    debug!("core: dropping stale metadata for {} at {}", channel, offset);
                    return true;
                }
                debug!("core: metadata for {} at {}", channel, offset);
                let label = self.favorites.table().name_of(&channel);
                if self.playback.apply_metadata(&label, &response) {
                    let src = self.playback.display().artwork.src().to_string();
                    self.check_artwork(ArtTarget::NowPlaying, src);
                }
            }

            CoreEvent::FavoriteNowPlaying { channel, response } => {
                let before = self.favorite_art(&channel);
                self.favorites.apply_now_playing(&channel, &response);
                let after = self.favorite_art(&channel);
                if let Some(src) = after.filter(|a| Some(a) != before.as_ref()) {
                    self.check_artwork(ArtTarget::Favorite(channel), src);
                }
            }

            CoreEvent::ArtworkFailed { target, url } => {
                if self.art_src(&target).as_deref() == Some(url.as_str()) {
                    self.advance_artwork(target);
                }
            }

            CoreEvent::HoldElapsed => {
                self.favorites.tick(now());
            }
        }
        self.publish();
        true
    }

    pub fn dispatch(&mut self, action: Action) -> ActionReply {
        match action {
            // ── Profiles ─────────────────────────────────────────────────────
            Action::SelectProfile { id } => {
                if !self.profiles.select_profile(&id) {
                    return rejected("profile no longer exists");
                }
                self.on_session_changed();
            }
            Action::CreateProfile { name } => match self.profiles.create_profile(&name) {
                Ok(_) => self.on_session_changed(),
                Err(e) => return profile_failure(e),
            },
            Action::DeleteProfile { id } => match self.profiles.delete_profile(&id) {
                Ok(true) => self.on_session_changed(),
                Ok(false) => {}
                Err(e) => return profile_failure(e),
            },

            // ── Favorites ────────────────────────────────────────────────────
            Action::AddFavorite { channel } => {
                let result = self.favorites.add_favorite(&mut self.profiles, &channel);
                return self.after_favorites_write(result);
            }
            Action::RemoveFavorite { channel } => {
                let result = self.favorites.remove_favorite(&mut self.profiles, &channel);
                return self.after_favorites_write(result);
            }
            Action::Reorder { order } => {
                let result = self.favorites.reorder(&mut self.profiles, order);
                return self.after_favorites_write(result);
            }
            Action::PressFavorite { index } => {
                if self.favorites.press(index, now()) {
                    let tx = self.event_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(HOLD_TO_REORDER).await;
                        let _ = tx.send(CoreEvent::HoldElapsed).await;
                    });
                }
            }
            Action::PointerMove { x, y, rows } => {
                self.favorites.pointer_move(x, y, &rows);
            }
            Action::ReleasePointer => {
                let result = self.favorites.release(&mut self.profiles, now());
                return self.after_favorites_write(result);
            }
            Action::FinishReorder => self.favorites.finish_reorder(),

            // ── Playback ─────────────────────────────────────────────────────
            Action::PlayChannel { channel } => {
                let offset = self.playback.state().offset;
                let outcome = self.playback.start_stream(&channel, offset);
                return self.after_start(Some(outcome));
            }
            Action::SetOffsetSlider { value } => {
                let outcome = self.playback.set_offset_slider(value);
                return self.after_start(outcome);
            }
            Action::BackToLive => {
                let outcome = self.playback.back_to_live();
                return self.after_start(outcome);
            }
            Action::SetVolume { volume } => {
                let volume = self.playback.set_volume(volume);
                if let Err(e) = self.profiles.backend().set_volume(volume) {
                    warn!("core: persisting volume failed: {}", e);
                }
            }
            Action::ToggleMute => {
                self.playback.toggle_mute();
            }
            Action::TogglePause => {
                self.playback.toggle_pause();
            }

            // ── Display ──────────────────────────────────────────────────────
            Action::ToggleTheme => {
                self.theme = self.theme.toggled();
                if let Err(e) = self.profiles.backend().set_theme(self.theme) {
                    warn!("core: persisting theme failed: {}", e);
                }
            }
            Action::ArtworkFailed { target } => self.advance_artwork(target),
            Action::DismissNotice => self.playback.dismiss_notice(),
        }
        ActionReply::Ok
    }

    pub fn shutdown(&mut self) {
        self.active_poll = None;
        self.favorites_poll = None;
        self.playback.shutdown();
        self.publish();
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    fn on_session_changed(&mut self) {
        self.favorites.finish_reorder();
        let list = self.profiles.favorites().to_vec();
        self.favorites.rebuild(&list);
        self.on_favorites_changed();
    }

    fn on_favorites_changed(&mut self) {
        let list = self.profiles.favorites().to_vec();
        fetch_favorites(&self.client, &list, &self.event_tx);
        self.favorites_tx.send_replace(list);
    }

    fn after_favorites_write(&mut self, result: Result<bool, ProfileError>) -> ActionReply {
        match result {
            Ok(true) => {
                self.on_favorites_changed();
                ActionReply::Ok
            }
            Ok(false) => ActionReply::Ok,
            Err(e @ ProfileError::Gone(_)) => {
                warn!("core: {}, session ended", e);
                self.on_session_changed();
                profile_failure(e)
            }
            Err(e) => profile_failure(e),
        }
    }

    fn after_start(&mut self, outcome: Option<StartOutcome>) -> ActionReply {
        match outcome {
            None => ActionReply::Ok,
            Some(StartOutcome::Native | StartOutcome::Compat(_)) => {
                self.restart_active_poll();
                ActionReply::Ok
            }
            Some(StartOutcome::Unsupported) => {
                self.active_poll = None;
                ActionReply::Notice {
                    message: self.playback.notice().unwrap_or_default().to_string(),
                }
            }
            Some(StartOutcome::Failed) => {
                self.active_poll = None;
                ActionReply::Notice {
                    message: "playback could not be started".to_string(),
                }
            }
        }
    }

    fn restart_active_poll(&mut self) {
        self.active_poll = None;
        let Some(channel) = self.playback.state().active_channel.clone() else {
            return;
        };
        self.active_poll = Some(spawn_active_poll(
            self.client.clone(),
            channel,
            self.playback.state().offset,
            self.intervals.active,
            self.event_tx.clone(),
        ));
    }

    fn favorite_art(&self, channel: &str) -> Option<String> {
        self.favorites
            .rows()
            .iter()
            .find(|r| r.row.id == channel)
            .map(|r| r.thumbnail.src().to_string())
    }

    fn art_src(&self, target: &ArtTarget) -> Option<String> {
        match target {
            ArtTarget::NowPlaying => Some(self.playback.display().artwork.src().to_string()),
            ArtTarget::Favorite(ch) => self.favorite_art(ch),
            ArtTarget::Channel(ch) => self
                .favorites
                .canonical()
                .iter()
                .find(|c| &c.row.id == ch)
                .map(|c| c.art.src().to_string()),
        }
    }

    fn advance_artwork(&mut self, target: ArtTarget) {
        let next = match &target {
            ArtTarget::NowPlaying => self.playback.artwork_failed(),
            ArtTarget::Favorite(ch) => self.favorites.favorite_art_failed(ch),
            ArtTarget::Channel(ch) => self.favorites.channel_art_failed(ch),
        };
        match next {
            Some(src) => {
                debug!("core: artwork for {:?} falls back to {}", target, src);
                self.check_artwork(target, src);
            }
            None => debug!("core: artwork for {:?} exhausted", target),
        }
    }

    /// Fetch `url` in the background and report back if it can't be loaded.
    fn check_artwork(&self, target: ArtTarget, url: String) {
        let Some(assets) = self.assets.clone() else {
            return;
        };
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = assets.fetch(&url).await {
                debug!("core: artwork {} unavailable: {:#}", url, e);
                let _ = tx.send(CoreEvent::ArtworkFailed { target, url }).await;
            }
        });
    }

    fn snapshot(&self) -> ViewState {
        let active_id = self.profiles.active().map(|p| p.id.clone());
        let profiles = self
            .profiles
            .list_profiles()
            .iter()
            .enumerate()
            .map(|(i, p)| ProfileBadge {
                id: p.id.clone(),
                name: p.name.clone(),
                initials: p.initials(),
                colors: avatar_colors(i),
                active: active_id.as_deref() == Some(p.id.as_str()),
            })
            .collect();

        let table = self.favorites.table();
        let state = self.playback.state();
        let display = self.playback.display();
        let playback = PlaybackView {
            phase: self.playback.phase(),
            active_channel: state.active_channel.clone(),
            offset: state.offset,
            offset_label: self.playback.offset_label(),
            slider: self.playback.slider_value(),
            volume: state.volume,
            muted: state.muted,
            paused: state.paused,
            channel_label: display.channel_label.clone(),
            now_playing: display.now_playing.clone(),
            artwork: display.artwork.src().to_string(),
            xspf: state.active_channel.as_deref().map(|ch| {
                let (href, filename) = xspf_download(&self.endpoints, ch);
                DownloadLink { href, filename }
            }),
        };

        let m3u = favorites_m3u(&self.endpoints, self.profiles.favorites(), table);
        ViewState {
            theme: self.theme,
            theme_toggle: self.theme.toggle_glyph(),
            profiles,
            needs_profile_selection: active_id.is_none(),
            channels: self.favorites.canonical().to_vec(),
            show_genre: table.has_genre(),
            show_description: table.has_description(),
            favorites: self.favorites.view(),
            favorites_playlist: m3u.as_deref().map(m3u_data_uri),
            favorites_m3u: m3u,
            playback,
            notice: self.playback.notice().map(str::to_string),
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.snapshot());
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

fn rejected(reason: &str) -> ActionReply {
    ActionReply::Rejected {
        reason: reason.to_string(),
    }
}

fn profile_failure(e: ProfileError) -> ActionReply {
    if let ProfileError::Storage(ref inner) = e {
        error!("core: storage failure: {}", inner);
    }
    rejected(&e.to_string())
}
