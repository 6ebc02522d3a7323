//! Favorites view reconciliation.
//!
//! The channel table is canonical.  The favorites view holds one clone per
//! favorited id, in favorites order, and the canonical rows of those ids are
//! hidden so nothing is shown twice.  All favorites mutations go through
//! [`ProfileManager::update_favorites`] and are followed by a rebuild.

use std::collections::HashMap;
use std::time::Instant;

use cast_proto::channels::{ChannelRow, ChannelTable, DEFAULT_ART};
use cast_proto::profiles::{normalize_favorites, ProfileError, ProfileManager};
use cast_proto::protocol::{ChannelId, MetadataResponse};
use serde::Serialize;
use tracing::{debug, info};

use crate::artwork::ArtSlot;
use crate::reorder::{Rect, Release, ReorderGesture};

/// Last now-playing data seen for a channel.  Display only, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NowPlayingEntry {
    pub track_text: String,
    pub artwork_url: Option<String>,
    pub genre: Option<String>,
}

impl NowPlayingEntry {
    pub fn from_response(response: &MetadataResponse) -> Self {
        Self {
            track_text: response.nowplaying.display_text(),
            artwork_url: response.nowplaying.artwork_url().map(str::to_string),
            genre: response
                .channel
                .genre
                .clone()
                .filter(|g| !g.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowControl {
    Add,
    Remove,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalRow {
    #[serde(flatten)]
    pub row: ChannelRow,
    pub hidden: bool,
    pub art: ArtSlot,
    pub control: RowControl,
}

#[derive(Debug, Clone, Serialize)]
pub struct FavoriteRow {
    #[serde(flatten)]
    pub row: ChannelRow,
    pub now_playing: Option<String>,
    pub thumbnail: ArtSlot,
    /// No canonical row exists for this id.
    pub placeholder: bool,
    pub dragging: bool,
    pub control: RowControl,
    #[serde(skip)]
    applied_art: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FavoritesView {
    /// False when there are no favorites; the whole section is hidden then.
    pub visible: bool,
    pub reorder_mode: bool,
    pub rows: Vec<FavoriteRow>,
    pub show_genre: bool,
    pub show_description: bool,
}

pub struct FavoritesReconciler {
    table: ChannelTable,
    canonical: Vec<CanonicalRow>,
    rows: Vec<FavoriteRow>,
    now_playing: HashMap<ChannelId, NowPlayingEntry>,
    gesture: ReorderGesture,
}

impl FavoritesReconciler {
    pub fn new(table: ChannelTable) -> Self {
        let canonical = table
            .rows()
            .iter()
            .map(|row| CanonicalRow {
                row: row.clone(),
                hidden: false,
                art: ArtSlot::new(row.art.clone(), row.alt_art.clone()),
                control: RowControl::Add,
            })
            .collect();
        Self {
            table,
            canonical,
            rows: Vec::new(),
            now_playing: HashMap::new(),
            gesture: ReorderGesture::new(),
        }
    }

    pub fn table(&self) -> &ChannelTable {
        &self.table
    }

    pub fn canonical(&self) -> &[CanonicalRow] {
        &self.canonical
    }

    pub fn rows(&self) -> &[FavoriteRow] {
        &self.rows
    }

    /// Current on-screen order of the favorites view.
    pub fn order(&self) -> Vec<ChannelId> {
        self.rows.iter().map(|r| r.row.id.clone()).collect()
    }

    pub fn view(&self) -> FavoritesView {
        let dragging = self.gesture.dragging();
        let rows = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| FavoriteRow {
                dragging: dragging == Some(i),
                ..r.clone()
            })
            .collect();
        FavoritesView {
            visible: !self.rows.is_empty(),
            reorder_mode: self.gesture.in_reorder_mode(),
            rows,
            show_genre: self.table.has_genre(),
            show_description: self.table.has_description(),
        }
    }

    /// Returns true when the list changed and was persisted.
    pub fn add_favorite(
        &mut self,
        profiles: &mut ProfileManager,
        channel: &str,
    ) -> Result<bool, ProfileError> {
        let Some(id) = profiles.active().map(|p| p.id.clone()) else {
            debug!("favorites: add {} without a session", channel);
            return Ok(false);
        };
        if channel.is_empty() || profiles.favorites().iter().any(|f| f == channel) {
            return Ok(false);
        }
        let mut next = profiles.favorites().to_vec();
        next.push(channel.to_string());
        self.commit(profiles, &id, next)
    }

    pub fn remove_favorite(
        &mut self,
        profiles: &mut ProfileManager,
        channel: &str,
    ) -> Result<bool, ProfileError> {
        let Some(id) = profiles.active().map(|p| p.id.clone()) else {
            debug!("favorites: remove {} without a session", channel);
            return Ok(false);
        };
        if !profiles.favorites().iter().any(|f| f == channel) {
            return Ok(false);
        }
        let next = profiles
            .favorites()
            .iter()
            .filter(|f| *f != channel)
            .cloned()
            .collect();
        self.commit(profiles, &id, next)
    }

    /// Replace the order wholesale.  `order` must be a permutation of the
    /// current favorites.
    pub fn reorder(
        &mut self,
        profiles: &mut ProfileManager,
        order: Vec<ChannelId>,
    ) -> Result<bool, ProfileError> {
        let Some(id) = profiles.active().map(|p| p.id.clone()) else {
            return Ok(false);
        };
        let mut current = profiles.favorites().to_vec();
        let mut proposed = order.clone();
        current.sort();
        proposed.sort();
        if current != proposed {
            debug!("favorites: rejected reorder that is not a permutation");
            return Ok(false);
        }
        self.commit(profiles, &id, order)
    }

    fn commit(
        &mut self,
        profiles: &mut ProfileManager,
        id: &str,
        next: Vec<ChannelId>,
    ) -> Result<bool, ProfileError> {
        if !profiles.update_favorites(id, next)? {
            return Ok(false);
        }
        let favorites = profiles.favorites().to_vec();
        self.rebuild(&favorites);
        Ok(true)
    }

    /// Make the view match `favorites` exactly.
    pub fn rebuild(&mut self, favorites: &[ChannelId]) {
        let favorites = normalize_favorites(favorites.iter().cloned());
        for c in &mut self.canonical {
            c.hidden = favorites.contains(&c.row.id);
        }
        self.rows = favorites.iter().map(|id| self.clone_row(id)).collect();
        if self.rows.is_empty() {
            self.gesture.finish();
        }
        debug!("favorites: rebuilt with {} rows", self.rows.len());
    }

    fn clone_row(&self, id: &str) -> FavoriteRow {
        let (row, placeholder) = match self.table.get(id) {
            Some(row) => (row.clone(), false),
            None => (
                ChannelRow {
                    id: id.to_string(),
                    name: self.table.name_of(id),
                    art: DEFAULT_ART.to_string(),
                    ..Default::default()
                },
                true,
            ),
        };
        let mut fav = FavoriteRow {
            thumbnail: ArtSlot::new(row.art.clone(), row.alt_art.clone()),
            row,
            now_playing: None,
            placeholder,
            dragging: false,
            control: RowControl::Remove,
            applied_art: None,
        };
        if let Some(entry) = self.now_playing.get(id) {
            apply_entry(&mut fav, entry);
        }
        fav
    }

    /// Apply a favorites-poll response to the row for `channel`.
    pub fn apply_now_playing(&mut self, channel: &str, response: &MetadataResponse) {
        let entry = NowPlayingEntry::from_response(response);
        for row in self.rows.iter_mut().filter(|r| r.row.id == channel) {
            apply_entry(row, &entry);
        }
        self.now_playing.insert(channel.to_string(), entry);
    }

    /// A favorite row's thumbnail failed to load.  Returns the next source.
    pub fn favorite_art_failed(&mut self, channel: &str) -> Option<String> {
        let row = self.rows.iter_mut().find(|r| r.row.id == channel)?;
        row.thumbnail.on_error().map(str::to_string)
    }

    pub fn channel_art_failed(&mut self, channel: &str) -> Option<String> {
        let row = self.canonical.iter_mut().find(|r| r.row.id == channel)?;
        row.art.on_error().map(str::to_string)
    }

    // ── Reorder gesture ─────────────────────────────────────────────────────

    pub fn in_reorder_mode(&self) -> bool {
        self.gesture.in_reorder_mode()
    }

    /// Pointer down on the favorite at `index`.  Returns true when a hold
    /// started (the caller should tick after the hold duration).
    pub fn press(&mut self, index: usize, now: Instant) -> bool {
        if index >= self.rows.len() {
            return false;
        }
        self.gesture.press(index, now);
        self.gesture.is_holding()
    }

    pub fn tick(&mut self, now: Instant) -> bool {
        let entered = self.gesture.tick(now);
        if entered {
            info!("favorites: reorder mode");
        }
        entered
    }

    /// Returns true when a row moved.
    /// Bounds past the last favorite are ignored.
    pub fn pointer_move(&mut self, x: f32, y: f32, bounds: &[Rect]) -> bool {
        let bounds = &bounds[..bounds.len().min(self.rows.len())];
        let Some((from, to)) = self.gesture.pointer_move(x, y, bounds) else {
            return false;
        };
        let row = self.rows.remove(from);
        self.rows.insert(to, row);
        true
    }

    /// Pointer up.  A finished drag persists the on-screen order; returns
    /// true when that happened.
    pub fn release(
        &mut self,
        profiles: &mut ProfileManager,
        now: Instant,
    ) -> Result<bool, ProfileError> {
        if self.gesture.release(now) != Release::Dropped {
            return Ok(false);
        }
        let Some(id) = profiles.active().map(|p| p.id.clone()) else {
            return Ok(false);
        };
        let order = self.order();
        let saved = profiles.update_favorites(&id, order)?;
        if saved {
            info!("favorites: saved new order for {}", id);
        }
        Ok(saved)
    }

    pub fn finish_reorder(&mut self) {
        self.gesture.finish();
    }
}

fn apply_entry(row: &mut FavoriteRow, entry: &NowPlayingEntry) {
    if let Some(genre) = &entry.genre {
        row.row.genre = genre.clone();
    }
    row.now_playing = Some(entry.track_text.clone());
    // Without artwork the row goes back to its own thumbnail.
    let art = entry.artwork_url.clone();
    if art != row.applied_art {
        let src = art.clone().unwrap_or_else(|| row.row.art.clone());
        row.thumbnail.set_src(src);
        row.applied_art = art;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorder::HOLD_TO_REORDER;
    use cast_proto::protocol::{ChannelInfo, NowPlaying};
    use cast_proto::store::{KvPersistence, MemoryStore};

    fn table() -> ChannelTable {
        ChannelTable::new(
            ["5", "9", "12"]
                .iter()
                .map(|id| ChannelRow {
                    id: id.to_string(),
                    name: format!("Name {}", id),
                    genre: "Rock".into(),
                    art: format!("/static/channel-art/{}.webp", id),
                    ..Default::default()
                })
                .collect(),
        )
    }

    fn session(favorites: &[&str]) -> (ProfileManager, FavoritesReconciler) {
        let mut profiles = ProfileManager::new(Box::new(KvPersistence::new(MemoryStore::new())));
        let p = profiles.create_profile("Alex").unwrap();
        profiles
            .update_favorites(&p.id, favorites.iter().map(|s| s.to_string()).collect())
            .unwrap();
        let mut fav = FavoritesReconciler::new(table());
        let current = profiles.favorites().to_vec();
        fav.rebuild(&current);
        (profiles, fav)
    }

    fn hidden(fav: &FavoritesReconciler) -> Vec<&str> {
        fav.canonical()
            .iter()
            .filter(|c| c.hidden)
            .map(|c| c.row.id.as_str())
            .collect()
    }

    fn bounds(n: usize) -> Vec<Rect> {
        (0..n)
            .map(|i| Rect {
                left: 0.0,
                top: i as f32 * 50.0,
                right: 200.0,
                bottom: i as f32 * 50.0 + 49.0,
            })
            .collect()
    }

    #[test]
    fn test_rebuild_matches_favorites_and_hides_complement() {
        let (_, fav) = session(&["12", "5"]);
        assert_eq!(fav.order(), vec!["12", "5"]);
        assert_eq!(hidden(&fav), vec!["5", "12"]);
        assert!(fav.view().visible);
        assert!(fav.rows().iter().all(|r| r.control == RowControl::Remove));
    }

    #[test]
    fn test_empty_favorites_hide_section() {
        let (_, fav) = session(&[]);
        assert!(!fav.view().visible);
        assert!(hidden(&fav).is_empty());
    }

    #[test]
    fn test_remove_shows_canonical_row_again() {
        let (mut profiles, mut fav) = session(&["5", "12"]);
        assert!(fav.remove_favorite(&mut profiles, "12").unwrap());
        assert_eq!(profiles.favorites(), &["5".to_string()]);
        assert_eq!(fav.order(), vec!["5"]);
        assert_eq!(hidden(&fav), vec!["5"]);
        // persisted
        assert_eq!(profiles.list_profiles()[0].favorites, vec!["5"]);
    }

    #[test]
    fn test_add_is_idempotent() {
        let (mut profiles, mut fav) = session(&["5"]);
        assert!(fav.add_favorite(&mut profiles, "9").unwrap());
        assert!(!fav.add_favorite(&mut profiles, "9").unwrap());
        assert_eq!(fav.order(), vec!["5", "9"]);
    }

    #[test]
    fn test_add_then_remove_is_identity() {
        let (mut profiles, mut fav) = session(&["5", "12"]);
        fav.add_favorite(&mut profiles, "9").unwrap();
        fav.remove_favorite(&mut profiles, "9").unwrap();
        assert_eq!(profiles.favorites(), &["5".to_string(), "12".to_string()]);
        assert_eq!(fav.order(), vec!["5", "12"]);
    }

    #[test]
    fn test_mutations_without_session_are_noops() {
        let mut profiles = ProfileManager::new(Box::new(KvPersistence::new(MemoryStore::new())));
        let mut fav = FavoritesReconciler::new(table());
        assert!(!fav.add_favorite(&mut profiles, "5").unwrap());
        assert!(!fav.remove_favorite(&mut profiles, "5").unwrap());
        assert!(fav.rows().is_empty());
    }

    #[test]
    fn test_unknown_channel_gets_placeholder_row() {
        let (_, fav) = session(&["77"]);
        let row = &fav.rows()[0];
        assert!(row.placeholder);
        assert_eq!(row.row.name, "Channel 77");
        assert_eq!(row.thumbnail.src(), DEFAULT_ART);
    }

    #[test]
    fn test_drag_reorder_persists_on_screen_order() {
        let (mut profiles, mut fav) = session(&["5", "9", "12"]);
        let t0 = Instant::now();
        assert!(fav.press(0, t0));
        assert!(fav.tick(t0 + HOLD_TO_REORDER));
        fav.press(0, t0);
        assert!(fav.pointer_move(10.0, 120.0, &bounds(3)));
        assert!(fav.view().rows[2].dragging);
        assert!(fav.release(&mut profiles, t0).unwrap());

        assert_eq!(fav.order(), vec!["9", "12", "5"]);
        assert_eq!(profiles.favorites(), fav.order().as_slice());
        assert_eq!(profiles.list_profiles()[0].favorites, fav.order());
        assert!(fav.in_reorder_mode());
        fav.finish_reorder();
        assert!(!fav.in_reorder_mode());
    }

    #[test]
    fn test_extra_bounds_do_not_move_the_drag() {
        let (mut profiles, mut fav) = session(&["5", "9"]);
        let t0 = Instant::now();
        fav.press(0, t0);
        fav.tick(t0 + HOLD_TO_REORDER);
        fav.press(0, t0);

        // a third rectangle with no favorite behind it
        assert!(!fav.pointer_move(10.0, 120.0, &bounds(3)));
        assert!(fav.view().rows[0].dragging);

        assert!(fav.pointer_move(10.0, 50.0, &bounds(3)));
        assert!(fav.release(&mut profiles, t0).unwrap());
        assert_eq!(fav.order(), vec!["9", "5"]);
    }

    #[test]
    fn test_early_release_cancels_hold() {
        let (mut profiles, mut fav) = session(&["5", "9"]);
        let t0 = Instant::now();
        fav.press(1, t0);
        assert!(!fav.release(&mut profiles, t0).unwrap());
        assert!(!fav.in_reorder_mode());
        assert!(!fav.pointer_move(10.0, 10.0, &bounds(2)));
    }

    #[test]
    fn test_reorder_requires_permutation() {
        let (mut profiles, mut fav) = session(&["5", "9"]);
        assert!(!fav
            .reorder(&mut profiles, vec!["5".into(), "12".into()])
            .unwrap());
        assert!(fav.reorder(&mut profiles, vec!["9".into(), "5".into()]).unwrap());
        assert_eq!(fav.order(), vec!["9", "5"]);
    }

    #[test]
    fn test_now_playing_applies_and_survives_rebuild() {
        let (mut profiles, mut fav) = session(&["5"]);
        let response = MetadataResponse {
            channel: ChannelInfo {
                name: None,
                genre: Some("Jazz".into()),
            },
            nowplaying: NowPlaying {
                artist: Some("A".into()),
                title: Some("B".into()),
                artwork: Some("https://art/x.jpg".into()),
                ..Default::default()
            },
        };
        fav.apply_now_playing("5", &response);
        fav.add_favorite(&mut profiles, "9").unwrap();

        let row = &fav.rows()[0];
        assert_eq!(row.now_playing.as_deref(), Some("A - B"));
        assert_eq!(row.row.genre, "Jazz");
        assert_eq!(row.thumbnail.src(), "https://art/x.jpg");
        assert_eq!(fav.rows()[1].now_playing, None);
    }

    #[test]
    fn test_missing_artwork_restores_original_thumbnail() {
        let (_, mut fav) = session(&["5"]);
        let with_art = MetadataResponse {
            nowplaying: NowPlaying {
                artwork: Some("https://art/x.jpg".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        fav.apply_now_playing("5", &with_art);
        fav.apply_now_playing("5", &MetadataResponse::default());
        assert_eq!(fav.rows()[0].thumbnail.src(), "/static/channel-art/5.webp");
        assert_eq!(fav.rows()[0].now_playing.as_deref(), Some(""));
    }

    #[test]
    fn test_failed_artwork_is_not_reapplied_by_next_poll() {
        let (_, mut fav) = session(&["5"]);
        let response = MetadataResponse {
            nowplaying: NowPlaying {
                artwork: Some("https://art/broken.jpg".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        fav.apply_now_playing("5", &response);
        assert_eq!(fav.favorite_art_failed("5").as_deref(), Some(DEFAULT_ART));
        assert_eq!(fav.favorite_art_failed("5"), None);
        fav.apply_now_playing("5", &response);
        assert_eq!(fav.rows()[0].thumbnail.src(), DEFAULT_ART);
    }
}
