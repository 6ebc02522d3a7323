//! Recording fakes for the engine seam and the metadata client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use cast_proto::protocol::{MetadataResponse, NowPlaying};
use tokio::sync::Notify;

use crate::engine::{AudioOutput, EngineError, EngineFactory, EngineGeneration, HlsConfig, PlaybackEngine};
use crate::metadata::MetadataClient;

/// Shared call log.
#[derive(Debug, Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == entry)
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub struct FakeOutput {
    log: Log,
    native: bool,
    paused: bool,
}

impl FakeOutput {
    pub fn new(log: Log, native: bool) -> Self {
        Self {
            log,
            native,
            paused: true,
        }
    }
}

impl AudioOutput for FakeOutput {
    fn can_play_type(&self, _mime: &str) -> bool {
        self.native
    }

    fn set_source(&mut self, url: &str) -> Result<(), EngineError> {
        self.log.push(format!("output.source {}", url));
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.log.push("output.play");
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.log.push("output.pause");
        self.paused = true;
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), EngineError> {
        self.log.push(format!("output.volume {}", volume));
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) -> Result<(), EngineError> {
        self.log.push(format!("output.mute {}", muted));
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeFactory {
    log: Log,
    supported: bool,
    live: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    fail_recovery: Arc<AtomicBool>,
}

impl FakeFactory {
    pub fn new(log: Log, supported: bool) -> Self {
        Self {
            log,
            supported,
            live: Arc::default(),
            created: Arc::default(),
            fail_recovery: Arc::default(),
        }
    }

    pub fn live_engines(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn fail_recovery(&self) {
        self.fail_recovery.store(true, Ordering::SeqCst);
    }
}

impl EngineFactory for FakeFactory {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn create(
        &mut self,
        generation: EngineGeneration,
        config: &HlsConfig,
    ) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        assert_eq!(config, &HlsConfig::low_latency());
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("engine.create {}", generation));
        Ok(Box::new(FakeEngine {
            log: self.log.clone(),
            live: self.live.clone(),
            fail_recovery: self.fail_recovery.load(Ordering::SeqCst),
            destroyed: false,
        }))
    }
}

struct FakeEngine {
    log: Log,
    live: Arc<AtomicUsize>,
    fail_recovery: bool,
    destroyed: bool,
}

impl PlaybackEngine for FakeEngine {
    fn load_source(&mut self, url: &str) -> Result<(), EngineError> {
        self.log.push(format!("engine.load {}", url));
        Ok(())
    }

    fn start_load(&mut self) -> Result<(), EngineError> {
        self.log.push("engine.start_load");
        if self.fail_recovery {
            return Err(EngineError::RetriesExhausted(6));
        }
        Ok(())
    }

    fn recover_media_error(&mut self) -> Result<(), EngineError> {
        self.log.push("engine.recover_media_error");
        if self.fail_recovery {
            return Err(EngineError::Command("recover".into()));
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.log.push("engine.destroy");
        }
    }
}

/// Metadata client answering from a table; unknown channels fail.
/// With `gate` set, every request waits for a notification first.
#[derive(Clone, Default)]
pub struct FakeMetadata {
    pub calls: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub tracks: Arc<Mutex<HashMap<String, (String, String)>>>,
    pub gate: Option<Arc<Notify>>,
}

impl FakeMetadata {
    pub fn with_track(self, channel: &str, artist: &str, title: &str) -> Self {
        self.tracks
            .lock()
            .unwrap()
            .insert(channel.to_string(), (artist.to_string(), title.to_string()));
        self
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MetadataClient for FakeMetadata {
    async fn now_playing(&self, channel: &str, _offset: u16) -> anyhow::Result<MetadataResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let track = self.tracks.lock().unwrap().get(channel).cloned();
        let (artist, title) = track.ok_or_else(|| anyhow!("no metadata for {}", channel))?;
        Ok(MetadataResponse {
            nowplaying: NowPlaying {
                artist: Some(artist),
                title: Some(title),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}
