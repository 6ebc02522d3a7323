//! ViewState: the read-only snapshot published after every core event.
//!
//! Renderers (the HTTP API, tests) read this; only the core writes it.

use cast_proto::protocol::{offset_label, ChannelId, Theme, MAX_OFFSET};
use serde::Serialize;

use crate::favorites::{CanonicalRow, FavoritesView};
use crate::playback::PlaybackPhase;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileBadge {
    pub id: String,
    pub name: String,
    pub initials: String,
    /// Gradient start and end colours.
    pub colors: (&'static str, &'static str),
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadLink {
    pub href: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackView {
    pub phase: PlaybackPhase,
    pub active_channel: Option<ChannelId>,
    pub offset: u16,
    pub offset_label: String,
    pub slider: u16,
    pub volume: u8,
    pub muted: bool,
    pub paused: bool,
    pub channel_label: String,
    pub now_playing: String,
    pub artwork: String,
    /// VLC playlist for the active channel.
    pub xspf: Option<DownloadLink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewState {
    pub theme: Theme,
    pub theme_toggle: &'static str,
    pub profiles: Vec<ProfileBadge>,
    pub needs_profile_selection: bool,
    pub channels: Vec<CanonicalRow>,
    pub show_genre: bool,
    pub show_description: bool,
    pub favorites: FavoritesView,
    /// `data:` URI of the favorites M3U; absent without favorites.
    pub favorites_playlist: Option<String>,
    #[serde(skip)]
    pub favorites_m3u: Option<String>,
    pub playback: PlaybackView,
    pub notice: Option<String>,
}

impl ViewState {
    /// Nothing loaded yet: no profiles, no channels, idle playback.
    pub fn empty(theme: Theme) -> Self {
        Self {
            theme,
            theme_toggle: theme.toggle_glyph(),
            profiles: Vec::new(),
            needs_profile_selection: true,
            channels: Vec::new(),
            show_genre: false,
            show_description: false,
            favorites: FavoritesView {
                visible: false,
                reorder_mode: false,
                rows: Vec::new(),
                show_genre: false,
                show_description: false,
            },
            favorites_playlist: None,
            favorites_m3u: None,
            playback: PlaybackView {
                phase: PlaybackPhase::Idle,
                active_channel: None,
                offset: 0,
                offset_label: offset_label(0),
                slider: MAX_OFFSET,
                volume: 0,
                muted: false,
                paused: false,
                channel_label: String::new(),
                now_playing: String::new(),
                artwork: String::new(),
                xspf: None,
            },
            notice: None,
        }
    }

    pub fn active_profile(&self) -> Option<&ProfileBadge> {
        self.profiles.iter().find(|p| p.active)
    }

    pub fn visible_channels(&self) -> impl Iterator<Item = &CanonicalRow> {
        self.channels.iter().filter(|c| !c.hidden)
    }
}
