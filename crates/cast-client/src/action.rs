//! Every command the control surface can send to the core.

use cast_proto::protocol::ChannelId;
use serde::{Deserialize, Serialize};

use crate::artwork::ArtTarget;
use crate::reorder::Rect;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    // ── Profiles ─────────────────────────────────────────────────────────────
    SelectProfile { id: String },
    CreateProfile { name: String },
    DeleteProfile { id: String },

    // ── Favorites ────────────────────────────────────────────────────────────
    AddFavorite { channel: ChannelId },
    RemoveFavorite { channel: ChannelId },
    /// Whole-list reorder; must be a permutation of the current favorites.
    Reorder { order: Vec<ChannelId> },
    PressFavorite { index: usize },
    /// `rows` are the favorites' bounds in current on-screen order.
    PointerMove { x: f32, y: f32, rows: Vec<Rect> },
    ReleasePointer,
    FinishReorder,

    // ── Playback ─────────────────────────────────────────────────────────────
    PlayChannel { channel: ChannelId },
    /// 0..=300, where 300 is live.
    SetOffsetSlider { value: u16 },
    BackToLive,
    SetVolume { volume: u8 },
    ToggleMute,
    TogglePause,

    // ── Display ──────────────────────────────────────────────────────────────
    ToggleTheme,
    ArtworkFailed { target: ArtTarget },
    DismissNotice,
}

/// Result of dispatching one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionReply {
    Ok,
    /// Rejected by validation; nothing changed.
    Rejected { reason: String },
    /// Accepted but needs the user's attention.
    Notice { message: String },
}
