//! Listener profiles and the active session.
//!
//! Every mutating call is a read-modify-write of the whole collection through
//! the [`Persistence`] backend; the manager never trusts an in-memory copy of
//! the collection across calls.  Another client writing the same storage in
//! between simply wins or loses depending on who writes last.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::protocol::ChannelId;
use crate::store::{Persistence, StoreError};

/// Names longer than this are cut.
pub const MAX_NAME_CHARS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "lenient_favorites")]
    pub favorites: Vec<ChannelId>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: i64,
}

impl Profile {
    /// Up to two upper-case initials, one per word.
    pub fn initials(&self) -> String {
        self.name
            .split_whitespace()
            .filter_map(|w| w.chars().next())
            .flat_map(char::to_uppercase)
            .take(2)
            .collect()
    }
}

const AVATAR_COLORS: [(&str, &str); 8] = [
    ("#0f9bd7", "#0b7eaf"),
    ("#e74c3c", "#c0392b"),
    ("#2ecc71", "#27ae60"),
    ("#9b59b6", "#8e44ad"),
    ("#f39c12", "#d68910"),
    ("#1abc9c", "#16a085"),
    ("#e91e63", "#c2185b"),
    ("#00bcd4", "#0097a7"),
];

/// Gradient colour pair for the avatar at `index` in the profile list.
pub fn avatar_colors(index: usize) -> (&'static str, &'static str) {
    AVATAR_COLORS[index % AVATAR_COLORS.len()]
}

/// Stored favorites may be missing, `null`, a non-array, or contain numbers.
fn lenient_favorites<'de, D>(deserializer: D) -> Result<Vec<ChannelId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    let items = match raw {
        serde_json::Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(normalize_favorites(items.into_iter().filter_map(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })))
}

/// Drop empty ids and later duplicates, keeping first-seen order.
pub fn normalize_favorites<I>(ids: I) -> Vec<ChannelId>
where
    I: IntoIterator<Item = ChannelId>,
{
    let mut out: Vec<ChannelId> = Vec::new();
    for id in ids {
        if id.is_empty() || out.contains(&id) {
            continue;
        }
        out.push(id);
    }
    out
}

/// Parse a stored collection.  Anything that is not an array reads as empty;
/// entries that are not valid profiles are dropped.
pub fn parse_profiles(raw: &str) -> Vec<Profile> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("profiles: stored collection unparseable ({}), using empty", e);
            return Vec::new();
        }
    };
    let serde_json::Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Profile>(item) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("profiles: dropping malformed entry: {}", e);
                None
            }
        })
        .collect()
}

fn generate_profile_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("user_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile name must not be empty")]
    EmptyName,
    #[error("profile {0} no longer exists")]
    Gone(String),
    #[error("this storage keeps a single listener profile")]
    SingleListener,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub struct ProfileManager {
    backend: Box<dyn Persistence>,
    session: Option<Profile>,
}

impl ProfileManager {
    pub fn new(backend: Box<dyn Persistence>) -> Self {
        Self {
            backend,
            session: None,
        }
    }

    pub fn backend(&self) -> &dyn Persistence {
        self.backend.as_ref()
    }

    /// Never fails: unreadable storage reads as no profiles.
    pub fn list_profiles(&self) -> Vec<Profile> {
        self.load_soft()
    }

    /// Re-activate the profile named by the stored current-user pointer.
    pub fn restore_session(&mut self) -> Option<&Profile> {
        let id = self.backend.current_user()?;
        let found = self.load_soft().into_iter().find(|p| p.id == id);
        if found.is_none() {
            debug!("profiles: stored session {} no longer exists", id);
        }
        self.session = found;
        self.session.as_ref()
    }

    pub fn create_profile(&mut self, name: &str) -> Result<Profile, ProfileError> {
        if self.backend.single_listener() {
            return Err(ProfileError::SingleListener);
        }
        let name: String = name.trim().chars().take(MAX_NAME_CHARS).collect();
        let name = name.trim_end().to_string();
        if name.is_empty() {
            return Err(ProfileError::EmptyName);
        }

        let profile = Profile {
            id: generate_profile_id(),
            name,
            favorites: Vec::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        let mut all = self.load_soft();
        all.push(profile.clone());
        self.backend.save_profiles(&all)?;
        info!("profiles: created {} ({})", profile.name, profile.id);

        self.activate(profile.clone());
        Ok(profile)
    }

    /// Returns false when the profile is gone (e.g. deleted by another client).
    pub fn select_profile(&mut self, id: &str) -> bool {
        match self.load_soft().into_iter().find(|p| p.id == id) {
            Some(profile) => {
                info!("profiles: selected {}", profile.id);
                self.activate(profile);
                true
            }
            None => {
                warn!("profiles: select of unknown profile {}", id);
                false
            }
        }
    }

    /// Remove a profile.  Returns true when it was the active session, in
    /// which case the session is now empty and a new selection is needed.
    pub fn delete_profile(&mut self, id: &str) -> Result<bool, ProfileError> {
        if self.backend.single_listener() {
            return Err(ProfileError::SingleListener);
        }
        let mut all = self.load_soft();
        all.retain(|p| p.id != id);
        self.backend.save_profiles(&all)?;

        let was_active = self.session.as_ref().is_some_and(|s| s.id == id);
        if was_active {
            self.session = None;
            if let Err(e) = self.backend.set_current_user(None) {
                warn!("profiles: clearing current user failed: {}", e);
            }
        }
        info!("profiles: deleted {} (was_active={})", id, was_active);
        Ok(was_active)
    }

    /// Sole write path for favorites.  Fails with [`ProfileError::Gone`] if
    /// the profile no longer exists in storage; when that profile was the
    /// active session the session is cleared too.
    pub fn update_favorites(
        &mut self,
        id: &str,
        favorites: Vec<ChannelId>,
    ) -> Result<bool, ProfileError> {
        let favorites = normalize_favorites(favorites);
        let mut all = self.load_soft();
        let Some(stored) = all.iter_mut().find(|p| p.id == id) else {
            warn!("profiles: favorites update for missing profile {}", id);
            if self.session.as_ref().is_some_and(|s| s.id == id) {
                self.session = None;
                if let Err(e) = self.backend.set_current_user(None) {
                    warn!("profiles: clearing current user failed: {}", e);
                }
            }
            return Err(ProfileError::Gone(id.to_string()));
        };
        stored.favorites = favorites.clone();
        self.backend.save_profiles(&all)?;

        if let Some(session) = self.session.as_mut().filter(|s| s.id == id) {
            session.favorites = favorites;
        }
        Ok(true)
    }

    pub fn active(&self) -> Option<&Profile> {
        self.session.as_ref()
    }

    /// Favorites of the active session; empty without one.
    pub fn favorites(&self) -> &[ChannelId] {
        self.session
            .as_ref()
            .map(|s| s.favorites.as_slice())
            .unwrap_or(&[])
    }

    fn activate(&mut self, profile: Profile) {
        if let Err(e) = self.backend.set_current_user(Some(&profile.id)) {
            warn!("profiles: persisting current user failed: {}", e);
        }
        self.session = Some(profile);
    }

    fn load_soft(&self) -> Vec<Profile> {
        self.backend.load_profiles().unwrap_or_else(|e| {
            warn!("profiles: load failed: {}", e);
            Vec::new()
        })
    }
}
