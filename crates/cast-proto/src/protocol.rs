use serde::{Deserialize, Serialize};

/// Channel identifiers are opaque strings ("5", "12", ...).
pub type ChannelId = String;

/// Largest supported time-shift, in minutes behind live.
pub const MAX_OFFSET: u16 = 300;

/// Body of `GET /metadata/{channel}/{offset}`.
///
/// The server sends the whole lineup entry under `channel`; only the fields we
/// display are kept, everything else is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetadataResponse {
    #[serde(default)]
    pub channel: ChannelInfo,
    #[serde(default)]
    pub nowplaying: NowPlaying,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NowPlaying {
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub artwork: Option<String>,
}

impl NowPlaying {
    /// "Artist - Title", or whichever half is present, or empty.
    pub fn display_text(&self) -> String {
        let artist = non_blank(self.artist.as_deref());
        let title = non_blank(self.title.as_deref());
        match (artist, title) {
            (Some(a), Some(t)) => format!("{} - {}", a, t),
            (Some(a), None) => a.to_string(),
            (None, Some(t)) => t.to_string(),
            (None, None) => String::new(),
        }
    }

    pub fn artwork_url(&self) -> Option<&str> {
        non_blank(self.artwork.as_deref())
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.is_empty())
}

/// Colour scheme persisted between sessions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    /// Glyph shown on the toggle button (the theme you would switch to).
    pub fn toggle_glyph(&self) -> &'static str {
        match self {
            Theme::Dark => "☀️",
            Theme::Light => "🌙",
        }
    }
}

/// URL builder for the streaming server's read-only endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn metadata(&self, channel: &str, offset: u16) -> String {
        format!("{}/metadata/{}/{}", self.base, channel, offset)
    }

    /// Live stream URL without cache-busting (used in playlists).
    pub fn stream(&self, channel: &str) -> String {
        format!("{}/hls/{}.m3u8", self.base, channel)
    }

    /// Stream URL with a `_t` query so intermediaries never hand back a stale manifest.
    pub fn stream_cache_busted(&self, channel: &str, stamp_millis: i64) -> String {
        format!("{}?_t={}", self.stream(channel), stamp_millis)
    }

    pub fn xspf(&self, channel: &str) -> String {
        format!("{}/vlc/{}.xspf", self.base, channel)
    }

    pub fn resolve(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else if path_or_url.starts_with('/') {
            format!("{}{}", self.base, path_or_url)
        } else {
            format!("{}/{}", self.base, path_or_url)
        }
    }
}

/// Human label for a time-shift offset.
pub fn offset_label(offset: u16) -> String {
    if offset == 0 {
        "Live".to_string()
    } else {
        format!("{} min ago", offset)
    }
}
