//! Playback state machine.
//!
//! `Idle -> Loading -> Playing -> (Error | Idle)`.  The controller owns the
//! single audio output and at most one compatibility engine; starting a
//! stream always destroys the previous engine before anything else happens.

use cast_proto::channels::DEFAULT_ART;
use cast_proto::protocol::{offset_label, ChannelId, Endpoints, MetadataResponse, MAX_OFFSET};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::artwork::ArtSlot;
use crate::engine::{
    AudioOutput, EngineEvent, EngineFactory, EngineGeneration, EngineSignal, ErrorKind, HlsConfig,
    PlaybackEngine, HLS_MIME,
};

pub const RETRIEVING_INFO: &str = "Retrieving info...";
pub const UNSUPPORTED_NOTICE: &str =
    "This player cannot play HLS streams. Install mpv, or download the channel playlist for VLC.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    Idle,
    Loading,
    Playing,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
    pub active_channel: Option<ChannelId>,
    /// Minutes behind live, 0..=300.
    pub offset: u16,
    pub muted: bool,
    /// 0..=100.
    pub volume: u8,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Native,
    Compat(EngineGeneration),
    /// Nothing can play the stream; a notice was raised.
    Unsupported,
    Failed,
}

/// The now-playing panel: channel label, track text and cover art.
#[derive(Debug, Clone, Serialize)]
pub struct NowPlayingDisplay {
    pub channel_label: String,
    pub now_playing: String,
    pub artwork: ArtSlot,
    #[serde(skip)]
    last_now_playing: Option<String>,
}

impl Default for NowPlayingDisplay {
    fn default() -> Self {
        Self {
            channel_label: String::new(),
            now_playing: String::new(),
            artwork: ArtSlot::placeholder(),
            last_now_playing: None,
        }
    }
}

impl NowPlayingDisplay {
    /// Text and art only change when the track text does.  Returns true
    /// when the artwork source was replaced.
    pub fn set(&mut self, channel_label: &str, now_playing: &str, artwork: Option<&str>) -> bool {
        self.channel_label = channel_label.to_string();
        if self.last_now_playing.as_deref() == Some(now_playing) {
            return false;
        }
        self.now_playing = now_playing.to_string();
        self.last_now_playing = Some(now_playing.to_string());
        let before = self.artwork.src().to_string();
        self.artwork.set_src(artwork.unwrap_or(DEFAULT_ART));
        self.artwork.src() != before
    }
}

pub struct PlaybackController {
    output: Box<dyn AudioOutput>,
    factory: Box<dyn EngineFactory>,
    engine: Option<Box<dyn PlaybackEngine>>,
    generation: EngineGeneration,
    endpoints: Endpoints,
    hls: HlsConfig,
    phase: PlaybackPhase,
    state: PlaybackState,
    display: NowPlayingDisplay,
    notice: Option<String>,
}

impl PlaybackController {
    pub fn new(
        mut output: Box<dyn AudioOutput>,
        factory: Box<dyn EngineFactory>,
        endpoints: Endpoints,
        volume: u8,
    ) -> Self {
        let volume = volume.min(100);
        if let Err(e) = output.set_volume(volume) {
            warn!("playback: initial volume not applied: {}", e);
        }
        Self {
            output,
            factory,
            engine: None,
            generation: 0,
            endpoints,
            hls: HlsConfig::low_latency(),
            phase: PlaybackPhase::Idle,
            state: PlaybackState {
                active_channel: None,
                offset: 0,
                muted: false,
                volume,
                paused: false,
            },
            display: NowPlayingDisplay::default(),
            notice: None,
        }
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn display(&self) -> &NowPlayingDisplay {
        &self.display
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn offset_label(&self) -> String {
        offset_label(self.state.offset)
    }

    /// Slider position for the current offset (300 is live).
    pub fn slider_value(&self) -> u16 {
        MAX_OFFSET - self.state.offset
    }

    pub fn start_stream(&mut self, channel: &str, offset: u16) -> StartOutcome {
        let offset = offset.min(MAX_OFFSET);
        info!("playback: start {} at offset {}", channel, offset);

        self.phase = PlaybackPhase::Loading;
        self.notice = None;
        self.state.active_channel = Some(channel.to_string());
        self.state.offset = offset;
        self.state.paused = false;
        self.display.set(RETRIEVING_INFO, "", None);
        self.teardown();

        let url = self
            .endpoints
            .stream_cache_busted(channel, chrono::Utc::now().timestamp_millis());

        if self.output.can_play_type(HLS_MIME) {
            let started = self
                .output
                .set_source(&url)
                .and_then(|_| self.output.play());
            return match started {
                Ok(()) => {
                    self.phase = PlaybackPhase::Playing;
                    StartOutcome::Native
                }
                Err(e) => {
                    error!("playback: native start failed: {}", e);
                    self.phase = PlaybackPhase::Error;
                    StartOutcome::Failed
                }
            };
        }

        if self.factory.is_supported() {
            self.generation += 1;
            let generation = self.generation;
            let created = self
                .factory
                .create(generation, &self.hls)
                .and_then(|mut engine| engine.load_source(&url).map(|_| engine));
            return match created {
                Ok(engine) => {
                    debug!("playback: engine {} loading {}", generation, url);
                    self.engine = Some(engine);
                    StartOutcome::Compat(generation)
                }
                Err(e) => {
                    error!("playback: engine start failed: {}", e);
                    self.phase = PlaybackPhase::Error;
                    StartOutcome::Failed
                }
            };
        }

        warn!("playback: no way to play {}", url);
        self.notice = Some(UNSUPPORTED_NOTICE.to_string());
        StartOutcome::Unsupported
    }

    pub fn on_engine_event(&mut self, event: EngineEvent) {
        if self.engine.is_none() || event.generation != self.generation {
            debug!(
                "playback: dropping event from engine {} (current {})",
                event.generation, self.generation
            );
            return;
        }

        match event.signal {
            EngineSignal::Ready => {
                if let Err(e) = self.output.play() {
                    error!("playback: play after ready failed: {}", e);
                    self.fail_attempt();
                    return;
                }
                self.state.paused = false;
                self.phase = PlaybackPhase::Playing;
            }
            EngineSignal::Error {
                fatal: false,
                kind,
                detail,
            } => {
                warn!("playback: non-fatal {:?} error: {}", kind, detail);
            }
            EngineSignal::Error {
                fatal: true,
                kind,
                detail,
            } => {
                error!("playback: fatal {:?} error: {}", kind, detail);
                if kind == ErrorKind::Other {
                    self.teardown();
                    self.phase = PlaybackPhase::Idle;
                    return;
                }
                let Some(engine) = self.engine.as_mut() else {
                    return;
                };
                let recovered = if kind == ErrorKind::Network {
                    engine.start_load()
                } else {
                    engine.recover_media_error()
                };
                if let Err(e) = recovered {
                    error!("playback: recovery failed: {}", e);
                    self.fail_attempt();
                }
            }
        }
    }

    /// Update the offset; restarts the stream if a channel is active.
    pub fn change_offset(&mut self, offset: u16) -> Option<StartOutcome> {
        let offset = offset.min(MAX_OFFSET);
        self.state.offset = offset;
        let channel = self.state.active_channel.clone()?;
        Some(self.start_stream(&channel, offset))
    }

    pub fn set_offset_slider(&mut self, value: u16) -> Option<StartOutcome> {
        self.change_offset(MAX_OFFSET - value.min(MAX_OFFSET))
    }

    pub fn back_to_live(&mut self) -> Option<StartOutcome> {
        self.set_offset_slider(MAX_OFFSET)
    }

    /// Returns the clamped volume actually applied.
    pub fn set_volume(&mut self, volume: u8) -> u8 {
        let volume = volume.min(100);
        self.state.volume = volume;
        if let Err(e) = self.output.set_volume(volume) {
            warn!("playback: set volume failed: {}", e);
        }
        volume
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.state.muted = !self.state.muted;
        if let Err(e) = self.output.set_muted(self.state.muted) {
            warn!("playback: mute failed: {}", e);
        }
        self.state.muted
    }

    /// Returns the new paused flag.
    pub fn toggle_pause(&mut self) -> bool {
        if self.state.active_channel.is_none() {
            return self.state.paused;
        }
        let result = if self.output.is_paused() {
            self.output.play()
        } else {
            self.output.pause()
        };
        match result {
            Ok(()) => self.state.paused = self.output.is_paused(),
            Err(e) => warn!("playback: pause toggle failed: {}", e),
        }
        self.state.paused
    }

    /// Apply an active-channel metadata response.  Returns true when the
    /// artwork changed.
    pub fn apply_metadata(&mut self, fallback_label: &str, response: &MetadataResponse) -> bool {
        let label = response
            .channel
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(fallback_label);
        self.display.set(
            label,
            &response.nowplaying.display_text(),
            response.nowplaying.artwork_url(),
        )
    }

    /// The now-playing artwork failed to load.  Returns the next source.
    pub fn artwork_failed(&mut self) -> Option<String> {
        self.display.artwork.on_error().map(str::to_string)
    }

    pub fn shutdown(&mut self) {
        self.teardown();
        if let Err(e) = self.output.pause() {
            debug!("playback: pause on shutdown failed: {}", e);
        }
        self.phase = PlaybackPhase::Idle;
    }

    fn teardown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            debug!("playback: destroying engine {}", self.generation);
            engine.destroy();
        }
    }

    fn fail_attempt(&mut self) {
        self.teardown();
        self.phase = PlaybackPhase::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeFactory, FakeOutput, Log};

    fn controller(native: bool, compat: bool) -> (PlaybackController, Log, FakeFactory) {
        let log = Log::default();
        let factory = FakeFactory::new(log.clone(), compat);
        let c = PlaybackController::new(
            Box::new(FakeOutput::new(log.clone(), native)),
            Box::new(factory.clone()),
            Endpoints::new("http://radio"),
            80,
        );
        (c, log, factory)
    }

    fn fatal(generation: EngineGeneration, kind: ErrorKind) -> EngineEvent {
        EngineEvent {
            generation,
            signal: EngineSignal::Error {
                fatal: true,
                kind,
                detail: "boom".into(),
            },
        }
    }

    fn ready(generation: EngineGeneration) -> EngineEvent {
        EngineEvent {
            generation,
            signal: EngineSignal::Ready,
        }
    }

    #[test]
    fn test_native_path_plays_immediately() {
        let (mut c, log, _) = controller(true, true);
        assert_eq!(c.start_stream("5", 0), StartOutcome::Native);
        assert_eq!(c.phase(), PlaybackPhase::Playing);
        assert!(!c.has_engine());
        let entries = log.entries();
        assert!(entries
            .iter()
            .any(|e| e.starts_with("output.source http://radio/hls/5.m3u8?_t=")));
        assert_eq!(entries.last().map(String::as_str), Some("output.play"));
    }

    #[test]
    fn test_compat_path_waits_for_ready() {
        let (mut c, log, _) = controller(false, true);
        let StartOutcome::Compat(gen) = c.start_stream("5", 0) else {
            panic!("expected engine path");
        };
        assert_eq!(c.phase(), PlaybackPhase::Loading);
        assert_eq!(c.display().channel_label, RETRIEVING_INFO);
        c.on_engine_event(ready(gen));
        assert_eq!(c.phase(), PlaybackPhase::Playing);
        assert!(log.contains("output.play"));
    }

    #[test]
    fn test_unsupported_raises_notice_and_stays_loading() {
        let (mut c, _, _) = controller(false, false);
        assert_eq!(c.start_stream("5", 0), StartOutcome::Unsupported);
        assert_eq!(c.notice(), Some(UNSUPPORTED_NOTICE));
        assert_eq!(c.phase(), PlaybackPhase::Loading);
    }

    #[test]
    fn test_at_most_one_engine_exists() {
        let (mut c, _, factory) = controller(false, true);
        for ch in ["5", "9", "12", "5"] {
            c.start_stream(ch, 0);
            assert_eq!(factory.live_engines(), 1);
        }
        assert_eq!(factory.created(), 4);
        c.shutdown();
        assert_eq!(factory.live_engines(), 0);
    }

    #[test]
    fn test_stale_engine_events_are_ignored() {
        let (mut c, _, _) = controller(false, true);
        let StartOutcome::Compat(old) = c.start_stream("5", 0) else {
            panic!();
        };
        c.start_stream("9", 0);
        c.on_engine_event(ready(old));
        assert_eq!(c.phase(), PlaybackPhase::Loading);
        c.on_engine_event(fatal(old, ErrorKind::Other));
        assert!(c.has_engine());
    }

    #[test]
    fn test_network_error_reloads() {
        let (mut c, log, _) = controller(false, true);
        let StartOutcome::Compat(gen) = c.start_stream("5", 0) else {
            panic!();
        };
        c.on_engine_event(fatal(gen, ErrorKind::Network));
        assert!(log.contains("engine.start_load"));
        assert!(c.has_engine());
    }

    #[test]
    fn test_media_error_recovers_in_place() {
        let (mut c, log, _) = controller(false, true);
        let StartOutcome::Compat(gen) = c.start_stream("5", 0) else {
            panic!();
        };
        c.on_engine_event(fatal(gen, ErrorKind::Media));
        assert!(log.contains("engine.recover_media_error"));
        assert!(c.has_engine());
    }

    #[test]
    fn test_other_error_tears_down_to_idle() {
        let (mut c, _, factory) = controller(false, true);
        let StartOutcome::Compat(gen) = c.start_stream("5", 0) else {
            panic!();
        };
        c.on_engine_event(fatal(gen, ErrorKind::Other));
        assert_eq!(c.phase(), PlaybackPhase::Idle);
        assert_eq!(factory.live_engines(), 0);
    }

    #[test]
    fn test_failed_recovery_ends_in_error() {
        let (mut c, _, factory) = controller(false, true);
        factory.fail_recovery();
        let StartOutcome::Compat(gen) = c.start_stream("5", 0) else {
            panic!();
        };
        c.on_engine_event(fatal(gen, ErrorKind::Network));
        assert_eq!(c.phase(), PlaybackPhase::Error);
        assert!(!c.has_engine());
    }

    #[test]
    fn test_non_fatal_errors_change_nothing() {
        let (mut c, _, _) = controller(false, true);
        let StartOutcome::Compat(gen) = c.start_stream("5", 0) else {
            panic!();
        };
        c.on_engine_event(EngineEvent {
            generation: gen,
            signal: EngineSignal::Error {
                fatal: false,
                kind: ErrorKind::Network,
                detail: "slow".into(),
            },
        });
        assert_eq!(c.phase(), PlaybackPhase::Loading);
        assert!(c.has_engine());
    }

    #[test]
    fn test_offset_slider_restarts_current_channel() {
        let (mut c, log, _) = controller(true, false);
        c.start_stream("5", 0);
        log.clear();
        assert_eq!(c.set_offset_slider(250), Some(StartOutcome::Native));
        assert_eq!(c.offset_label(), "50 min ago");
        assert_eq!(c.state().offset, 50);
        assert_eq!(c.slider_value(), 250);
        assert!(log.entries().iter().any(|e| e.starts_with("output.source")));

        c.back_to_live();
        assert_eq!(c.offset_label(), "Live");
        assert_eq!(c.slider_value(), 300);
    }

    #[test]
    fn test_offset_without_channel_only_updates_label() {
        let (mut c, log, _) = controller(true, false);
        log.clear();
        assert_eq!(c.change_offset(400), None);
        assert_eq!(c.state().offset, 300);
        assert_eq!(c.offset_label(), "300 min ago");
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_volume_and_mute() {
        let (mut c, log, _) = controller(true, false);
        assert_eq!(c.state().volume, 80);
        assert_eq!(c.set_volume(140), 100);
        assert!(log.contains("output.volume 100"));
        assert!(c.toggle_mute());
        assert!(log.contains("output.mute true"));
        assert_eq!(c.state().volume, 100);
        assert!(!c.toggle_mute());
    }

    #[test]
    fn test_toggle_pause_keeps_engine() {
        let (mut c, _, factory) = controller(false, true);
        let StartOutcome::Compat(gen) = c.start_stream("5", 0) else {
            panic!();
        };
        c.on_engine_event(ready(gen));
        assert!(c.toggle_pause());
        assert!(!c.toggle_pause());
        assert_eq!(factory.live_engines(), 1);
    }

    #[test]
    fn test_metadata_updates_only_on_change() {
        let (mut c, _, _) = controller(true, false);
        c.start_stream("5", 0);
        let response = MetadataResponse {
            nowplaying: cast_proto::protocol::NowPlaying {
                artist: Some("A".into()),
                title: Some("B".into()),
                artwork: Some("https://art/1.jpg".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(c.apply_metadata("Name 5", &response));
        assert_eq!(c.display().channel_label, "Name 5");
        assert_eq!(c.display().now_playing, "A - B");
        assert_eq!(c.display().artwork.src(), "https://art/1.jpg");

        // same track, art failed meanwhile: no reflow back to the broken art
        c.artwork_failed();
        assert!(!c.apply_metadata("Name 5", &response));
        assert_eq!(c.display().artwork.src(), DEFAULT_ART);
    }
}
