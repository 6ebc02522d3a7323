//! Image slots with a one-way fallback chain.
//!
//! Each slot starts at its primary source.  When that fails to load it moves
//! to the alternate (if any, and only once), then to [`DEFAULT_ART`].  A
//! failure of the default itself is terminal, so a broken placeholder can
//! never cause a reload loop.

use cast_proto::channels::DEFAULT_ART;
use cast_proto::protocol::ChannelId;
use serde::{Deserialize, Serialize};

/// Which image element an artwork failure refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "channel", rename_all = "snake_case")]
pub enum ArtTarget {
    NowPlaying,
    Favorite(ChannelId),
    Channel(ChannelId),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtSlot {
    src: String,
    #[serde(skip)]
    alternate: Option<String>,
    #[serde(skip)]
    tried_alternate: bool,
}

impl ArtSlot {
    pub fn new(src: impl Into<String>, alternate: Option<String>) -> Self {
        let src = src.into();
        let src = if src.is_empty() {
            DEFAULT_ART.to_string()
        } else {
            src
        };
        Self {
            src,
            alternate: alternate.filter(|a| !a.is_empty()),
            tried_alternate: false,
        }
    }

    pub fn placeholder() -> Self {
        Self::new(DEFAULT_ART, None)
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    /// Point the slot at a new source.  The alternate is not re-armed.
    pub fn set_src(&mut self, src: impl Into<String>) {
        let src = src.into();
        self.src = if src.is_empty() {
            DEFAULT_ART.to_string()
        } else {
            src
        };
    }

    pub fn is_placeholder(&self) -> bool {
        self.src == DEFAULT_ART
    }

    /// Advance after a load failure.  Returns the next source to try, or
    /// `None` once the chain is exhausted.
    pub fn on_error(&mut self) -> Option<&str> {
        if !self.tried_alternate {
            if let Some(alt) = self.alternate.clone() {
                self.tried_alternate = true;
                if alt != self.src {
                    self.src = alt;
                    return Some(&self.src);
                }
            }
        }
        if self.is_placeholder() {
            return None;
        }
        self.src = DEFAULT_ART.to_string();
        Some(&self.src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_alternate_then_default() {
        let mut slot = ArtSlot::new(
            "/static/channel-art/5.webp",
            Some("https://cdn.example/5.jpg".into()),
        );
        assert_eq!(slot.on_error(), Some("https://cdn.example/5.jpg"));
        assert_eq!(slot.on_error(), Some(DEFAULT_ART));
        assert_eq!(slot.on_error(), None);
        assert_eq!(slot.src(), DEFAULT_ART);
    }

    #[test]
    fn test_alternate_is_tried_once_per_slot() {
        let mut slot = ArtSlot::new("a.webp", Some("b.jpg".into()));
        slot.on_error();
        slot.set_src("c.webp");
        assert_eq!(slot.on_error(), Some(DEFAULT_ART));
    }

    #[test]
    fn test_without_alternate_goes_straight_to_default() {
        let mut slot = ArtSlot::new("https://art/cover.jpg", None);
        assert_eq!(slot.on_error(), Some(DEFAULT_ART));
        assert_eq!(slot.on_error(), None);
    }

    #[test]
    fn test_empty_source_is_placeholder() {
        let slot = ArtSlot::new("", Some(String::new()));
        assert!(slot.is_placeholder());
        let mut slot = slot;
        assert_eq!(slot.on_error(), None);
    }

    #[test]
    fn test_art_target_wire_format() {
        let json = serde_json::to_string(&ArtTarget::Favorite("5".into())).unwrap();
        assert_eq!(json, r#"{"kind":"favorite","channel":"5"}"#);
        let back: ArtTarget = serde_json::from_str(r#"{"kind":"now_playing"}"#).unwrap();
        assert_eq!(back, ArtTarget::NowPlaying);
    }
}
