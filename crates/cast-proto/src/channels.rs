//! The canonical channel table.
//!
//! Rows are loaded once (from `channels.toml`) and never created or deleted by
//! the session logic; the favorites view only clones them and toggles their
//! visibility.

use serde::{Deserialize, Serialize};

use crate::protocol::ChannelId;

/// Static art shown when nothing better is available.
pub const DEFAULT_ART: &str = "/static/channel-art/404.webp";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelRow {
    pub id: ChannelId,
    pub name: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub description: String,
    /// Local thumbnail (usually under `/static/channel-art/`).
    #[serde(default)]
    pub art: String,
    /// Alternate external art tried once if `art` fails to load.
    #[serde(default)]
    pub alt_art: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelTable {
    rows: Vec<ChannelRow>,
}

impl ChannelTable {
    pub fn new(rows: Vec<ChannelRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ChannelRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ChannelRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Display name, defaulting to `Channel {id}` for unknown or unnamed rows.
    pub fn name_of(&self, id: &str) -> String {
        self.get(id)
            .map(|r| r.name.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Channel {}", id))
    }

    /// Whether the genre column carries anything worth showing.
    pub fn has_genre(&self) -> bool {
        self.rows.iter().any(|r| !r.genre.trim().is_empty())
    }

    pub fn has_description(&self) -> bool {
        self.rows.iter().any(|r| !r.description.trim().is_empty())
    }
}

// ── TOML loader ───────────────────────────────────────────────────────────────

/// Matches the `[[channel]]` tables of `channels.toml`.
#[derive(Debug, Deserialize)]
struct TomlChannelFile {
    #[serde(default)]
    channel: Vec<TomlChannel>,
}

#[derive(Debug, Deserialize)]
struct TomlChannel {
    id: TomlId,
    name: String,
    #[serde(default)]
    genre: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    art: String,
    #[serde(default)]
    alt_art: Option<String>,
}

/// Channel numbers are usually written bare (`id = 5`) but strings are accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlId {
    Number(i64),
    Text(String),
}

impl TomlId {
    fn into_id(self) -> ChannelId {
        match self {
            TomlId::Number(n) => n.to_string(),
            TomlId::Text(s) => s.trim().to_string(),
        }
    }
}

pub fn load_channels_from_toml(path: &std::path::Path) -> anyhow::Result<ChannelTable> {
    let content = std::fs::read_to_string(path)?;
    parse_channels_from_toml_str(&content)
}

pub fn parse_channels_from_toml_str(content: &str) -> anyhow::Result<ChannelTable> {
    let file: TomlChannelFile = toml::from_str(content)?;
    let mut rows: Vec<ChannelRow> = Vec::with_capacity(file.channel.len());
    for c in file.channel {
        let id = c.id.into_id();
        if id.is_empty() {
            tracing::warn!("channels: skipping entry '{}' with empty id", c.name);
            continue;
        }
        if rows.iter().any(|r| r.id == id) {
            tracing::warn!("channels: duplicate id {} ignored", id);
            continue;
        }
        let art = if c.art.is_empty() {
            format!("/static/channel-art/{}.webp", id)
        } else {
            c.art
        };
        rows.push(ChannelRow {
            id,
            name: c.name,
            genre: c.genre,
            description: c.description,
            art,
            alt_art: c.alt_art.filter(|s| !s.is_empty()),
        });
    }
    Ok(ChannelTable::new(rows))
}
