//! Persistence adapter.
//!
//! Two layers:
//!
//! - [`KeyValueStore`]: the raw durable get/set medium (JSON file, cookie jar
//!   file, or memory for tests).
//! - [`Persistence`]: the typed view the rest of the client uses (profiles,
//!   current-user pointer, theme, volume).  Two layouts exist, chosen at
//!   construction: the multi-profile key-value layout and the legacy
//!   single-listener cookie layout.
//!
//! Writes are whole-value replacements.  Nothing here locks across processes,
//! so two clients sharing a file get last-writer-wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::{StorageBackend, StorageConfig};
use crate::profiles::{normalize_favorites, parse_profiles, Profile};
use crate::protocol::Theme;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ── raw stores ────────────────────────────────────────────────────────────────

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// In-process store.  Clones share the same map, which is how tests model two
/// tabs looking at the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.map().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.map().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A JSON object on disk, re-read on every access so writes from another
/// process are picked up.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> StoreResult<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut map = self.read_map().unwrap_or_else(|e| {
            warn!("store: {} unreadable ({}), starting fresh", self.path.display(), e);
            BTreeMap::new()
        });
        map.insert(key.to_string(), value.to_string());
        write_atomically(&self.path, serde_json::to_string_pretty(&map)?.as_bytes())
    }
}

/// `name=value` lines, one cookie per line.  Values are stored as given;
/// escaping is the caller's business.
#[derive(Debug, Clone)]
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_cookies(&self) -> StoreResult<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect())
    }
}

impl KeyValueStore for CookieJar {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read_cookies()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut cookies = self.read_cookies()?;
        cookies.insert(key.to_string(), value.to_string());
        let body: String = cookies
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect();
        write_atomically(&self.path, body.as_bytes())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ── typed persistence ─────────────────────────────────────────────────────────

/// Everything the client keeps between sessions.
pub trait Persistence: Send {
    /// The whole profile collection.  Corrupt data reads as empty.
    fn load_profiles(&self) -> StoreResult<Vec<Profile>>;
    /// Replace the whole profile collection.
    fn save_profiles(&self, profiles: &[Profile]) -> StoreResult<()>;
    fn current_user(&self) -> Option<String>;
    fn set_current_user(&self, id: Option<&str>) -> StoreResult<()>;
    fn theme(&self) -> Theme;
    fn set_theme(&self, theme: Theme) -> StoreResult<()>;
    fn volume(&self) -> Option<u8>;
    fn set_volume(&self, volume: u8) -> StoreResult<()>;
    /// True when the layout holds exactly one implicit profile that can be
    /// neither created nor deleted.
    fn single_listener(&self) -> bool {
        false
    }
}

pub const KEY_USERS: &str = "seriouscast_users";
pub const KEY_CURRENT_USER: &str = "seriouscast_current_user";
pub const KEY_THEME: &str = "seriouscast_theme";
pub const KEY_VOLUME: &str = "seriouscast_volume";

/// Multi-profile layout: the profile collection is one JSON array value.
pub struct KvPersistence<S> {
    store: S,
}

impl<S: KeyValueStore> KvPersistence<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> Persistence for KvPersistence<S> {
    fn load_profiles(&self) -> StoreResult<Vec<Profile>> {
        match self.store.get(KEY_USERS)? {
            Some(raw) => Ok(parse_profiles(&raw)),
            None => Ok(Vec::new()),
        }
    }

    fn save_profiles(&self, profiles: &[Profile]) -> StoreResult<()> {
        let json = serde_json::to_string(profiles)?;
        self.store.set(KEY_USERS, &json)
    }

    fn current_user(&self) -> Option<String> {
        read_soft(&self.store, KEY_CURRENT_USER).filter(|id| !id.is_empty())
    }

    fn set_current_user(&self, id: Option<&str>) -> StoreResult<()> {
        self.store.set(KEY_CURRENT_USER, id.unwrap_or(""))
    }

    fn theme(&self) -> Theme {
        read_soft(&self.store, KEY_THEME)
            .and_then(|t| Theme::parse(&t))
            .unwrap_or_default()
    }

    fn set_theme(&self, theme: Theme) -> StoreResult<()> {
        self.store.set(KEY_THEME, theme.as_str())
    }

    fn volume(&self) -> Option<u8> {
        read_soft(&self.store, KEY_VOLUME).and_then(|v| parse_volume(&v))
    }

    fn set_volume(&self, volume: u8) -> StoreResult<()> {
        self.store.set(KEY_VOLUME, &volume.min(100).to_string())
    }
}

/// Id of the single implicit listener exposed by the cookie layout.
pub const LEGACY_PROFILE_ID: &str = "default";
const LEGACY_PROFILE_NAME: &str = "Listener";

/// Legacy single-listener layout: favorites are one escaped, comma-joined
/// cookie and there is exactly one profile.
pub struct CookiePersistence<S> {
    store: S,
}

impl<S: KeyValueStore> CookiePersistence<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> Persistence for CookiePersistence<S> {
    fn load_profiles(&self) -> StoreResult<Vec<Profile>> {
        let favorites = self
            .store
            .get("favorites")?
            .map(|raw| {
                let decoded = urlencoding::decode(&raw)
                    .map(|c| c.into_owned())
                    .unwrap_or(raw);
                normalize_favorites(decoded.split(',').map(str::to_string))
            })
            .unwrap_or_default();
        Ok(vec![Profile {
            id: LEGACY_PROFILE_ID.to_string(),
            name: LEGACY_PROFILE_NAME.to_string(),
            favorites,
            created_at: 0,
        }])
    }

    fn save_profiles(&self, profiles: &[Profile]) -> StoreResult<()> {
        if profiles.iter().any(|p| p.id != LEGACY_PROFILE_ID) {
            warn!("store: cookie layout keeps one listener; extra profiles are not saved");
        }
        let favorites = profiles
            .iter()
            .find(|p| p.id == LEGACY_PROFILE_ID)
            .map(|p| p.favorites.join(","))
            .unwrap_or_default();
        debug!("store: writing favorites cookie '{}'", favorites);
        self.store
            .set("favorites", &urlencoding::encode(&favorites))
    }

    fn current_user(&self) -> Option<String> {
        Some(LEGACY_PROFILE_ID.to_string())
    }

    fn set_current_user(&self, _id: Option<&str>) -> StoreResult<()> {
        Ok(())
    }

    fn theme(&self) -> Theme {
        read_soft(&self.store, "theme")
            .and_then(|t| Theme::parse(&t))
            .unwrap_or_default()
    }

    fn set_theme(&self, theme: Theme) -> StoreResult<()> {
        self.store.set("theme", theme.as_str())
    }

    fn volume(&self) -> Option<u8> {
        read_soft(&self.store, "volume").and_then(|v| parse_volume(&v))
    }

    fn set_volume(&self, volume: u8) -> StoreResult<()> {
        self.store.set("volume", &volume.min(100).to_string())
    }

    fn single_listener(&self) -> bool {
        true
    }
}

fn read_soft<S: KeyValueStore>(store: &S, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(v) => v,
        Err(e) => {
            warn!("store: reading {} failed: {}", key, e);
            None
        }
    }
}

fn parse_volume(raw: &str) -> Option<u8> {
    raw.trim().parse::<i64>().ok().map(|v| v.clamp(0, 100) as u8)
}

/// Build the persistence layout selected in the config.
pub fn open_persistence(config: &StorageConfig) -> Box<dyn Persistence> {
    match config.backend {
        StorageBackend::Kv => Box::new(KvPersistence::new(FileStore::new(&config.state_file))),
        StorageBackend::Cookie => {
            Box::new(CookiePersistence::new(CookieJar::new(&config.cookie_file)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_defaults_when_empty() {
        let p = KvPersistence::new(MemoryStore::new());
        assert!(p.load_profiles().unwrap().is_empty());
        assert_eq!(p.current_user(), None);
        assert_eq!(p.theme(), Theme::Light);
        assert_eq!(p.volume(), None);
    }

    #[test]
    fn test_kv_corrupt_collection_reads_empty() {
        let store = MemoryStore::new();
        store.set(KEY_USERS, "{not json").unwrap();
        let p = KvPersistence::new(store.clone());
        assert!(p.load_profiles().unwrap().is_empty());

        store.set(KEY_USERS, "null").unwrap();
        assert!(p.load_profiles().unwrap().is_empty());
    }

    #[test]
    fn test_kv_volume_and_theme() {
        let p = KvPersistence::new(MemoryStore::new());
        p.set_volume(42).unwrap();
        p.set_theme(Theme::Dark).unwrap();
        assert_eq!(p.volume(), Some(42));
        assert_eq!(p.theme(), Theme::Dark);
    }

    #[test]
    fn test_kv_current_user_cleared_with_empty_string() {
        let store = MemoryStore::new();
        let p = KvPersistence::new(store.clone());
        p.set_current_user(Some("user_1")).unwrap();
        assert_eq!(p.current_user().as_deref(), Some("user_1"));
        p.set_current_user(None).unwrap();
        assert_eq!(store.get(KEY_CURRENT_USER).unwrap().as_deref(), Some(""));
        assert_eq!(p.current_user(), None);
    }

    #[test]
    fn test_cookie_layout_roundtrips_favorites() {
        let store = MemoryStore::new();
        let p = CookiePersistence::new(store.clone());
        let mut profiles = p.load_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert!(profiles[0].favorites.is_empty());

        profiles[0].favorites = vec!["5".into(), "12".into()];
        p.save_profiles(&profiles).unwrap();
        assert_eq!(store.get("favorites").unwrap().as_deref(), Some("5%2C12"));
        assert_eq!(p.load_profiles().unwrap()[0].favorites, vec!["5", "12"]);
    }

    #[test]
    fn test_cookie_layout_reads_legacy_values() {
        let store = MemoryStore::new();
        store.set("favorites", "7%2C%2C9%2C7").unwrap();
        store.set("volume", "250").unwrap();
        let p = CookiePersistence::new(store);
        assert_eq!(p.load_profiles().unwrap()[0].favorites, vec!["7", "9"]);
        assert_eq!(p.volume(), Some(100));
        assert_eq!(p.current_user().as_deref(), Some(LEGACY_PROFILE_ID));
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("storage.json"));
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        let again = FileStore::new(store.path().to_path_buf());
        assert_eq!(again.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(again.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_file_store_recovers_from_garbage_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "garbage").unwrap();
        let store = FileStore::new(&path);
        assert!(store.get("a").is_err());
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_cookie_jar_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, "# comment\ntheme=dark\nbroken line\n").unwrap();
        let jar = CookieJar::new(&path);
        assert_eq!(jar.get("theme").unwrap().as_deref(), Some("dark"));
        jar.set("volume", "30").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("theme=dark\n"));
        assert!(content.contains("volume=30\n"));
    }
}
