/// mpv as the audio output and HLS engine.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← PendingRequest via mpsc → JSON line on the socket
///         └── reader_task   ← JSON lines from the socket
///                                ├── reply (request_id) → oneshot
///                                └── event              → spawn_event_bridge → CoreEvent::Engine
/// ```
///
/// Both the native path ([`MpvOutput`]) and the compatibility path
/// ([`MpvHlsEngine`]) drive the same process.  Commands issued from the
/// synchronous controller are fire-and-forget; the bridge turns mpv's
/// `file-loaded` / `end-file` / `log-message` events into engine signals
/// stamped with the generation of the live engine.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::core::CoreEvent;
use crate::engine::{
    AudioOutput, EngineError, EngineEvent, EngineFactory, EngineGeneration, EngineSignal,
    ErrorKind, HlsConfig, PlaybackEngine, HLS_MIME,
};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv message (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.raw.get(key)?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    fn request(command: Value) -> anyhow::Result<(PendingRequest, oneshot::Receiver<anyhow::Result<Value>>)> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        payload.push('\n');
        let (reply, rx) = oneshot::channel();
        Ok((
            PendingRequest {
                req_id,
                payload,
                reply,
            },
            rx,
        ))
    }

    /// Send a command and wait for mpv's reply.
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let (req, reply_rx) = Self::request(command)?;
        let req_id = req.req_id;
        self.tx
            .send(req)
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Queue a command without waiting for the reply.
    pub fn fire(&self, command: Value) -> Result<(), EngineError> {
        let (req, _) = Self::request(command).map_err(|e| EngineError::Command(e.to_string()))?;
        self.tx.try_send(req).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::Command("mpv command queue full".into()),
            mpsc::error::TrySendError::Closed(_) => EngineError::Closed,
        })
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    volume: u8,
}

impl MpvDriver {
    pub fn new(volume: u8) -> Self {
        Self {
            socket_name: cast_proto::platform::mpv_socket_name(),
            process: None,
            volume: volume.min(100),
        }
    }

    pub fn process_alive(&mut self) -> bool {
        let Some(child) = self.process.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!("mpv process exited: {}", status);
                false
            }
            Err(e) => {
                warn!("mpv liveness check failed: {}", e);
                false
            }
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary = cast_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let stderr_path = cast_proto::platform::data_dir().join("mpv-stderr.log");
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;

        let child = tokio::process::Command::new(&mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(cast_proto::platform::mpv_socket_arg())
            .arg(format!("--volume={}", self.volume))
            .stdout(std::process::Stdio::null())
            .stderr(stderr_file)
            .kill_on_drop(true)
            .spawn()?;
        info!("mpv: spawned pid {:?}, stderr → {:?}", child.id(), stderr_path);
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to {:?}", socket_path);
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to {}", pipe_path);
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));
    MpvHandle { tx: cmd_tx }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let closed_reason = match reader.read_line(&mut line).await {
            Ok(0) => "mpv IPC connection closed".to_string(),
            Err(e) => format!("mpv IPC read error: {}", e),
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };
                if let Some(req_id) = val.get("request_id").and_then(Value::as_u64) {
                    if let Some(tx) = pending.lock().await.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: req={} failed: {}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    debug!("mpv reader: event receiver gone");
                }
                continue;
            }
        };

        debug!("mpv reader: {}", closed_reason);
        for (_, tx) in pending.lock().await.drain() {
            let _ = tx.send(Err(anyhow::anyhow!(closed_reason.clone())));
        }
        break;
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── output ────────────────────────────────────────────────────────────────────

/// The mpv process seen as a plain audio output.  Without a handle (mpv
/// missing) it reports no capabilities.
pub struct MpvOutput {
    handle: Option<MpvHandle>,
    native_hls: bool,
    paused: bool,
}

impl MpvOutput {
    pub fn new(handle: Option<MpvHandle>, native_hls: bool) -> Self {
        Self {
            handle,
            native_hls,
            paused: false,
        }
    }

    fn handle(&self) -> Result<&MpvHandle, EngineError> {
        self.handle.as_ref().ok_or(EngineError::Closed)
    }
}

impl AudioOutput for MpvOutput {
    fn can_play_type(&self, mime: &str) -> bool {
        self.handle.is_some() && self.native_hls && mime == HLS_MIME
    }

    fn set_source(&mut self, url: &str) -> Result<(), EngineError> {
        self.handle()?.fire(json!(["loadfile", url, "replace"]))
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.handle()?.fire(json!(["set_property", "pause", false]))?;
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.handle()?.fire(json!(["set_property", "pause", true]))?;
        self.paused = true;
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), EngineError> {
        self.handle()?
            .fire(json!(["set_property", "volume", volume.min(100)]))
    }

    fn set_muted(&mut self, muted: bool) -> Result<(), EngineError> {
        self.handle()?.fire(json!(["set_property", "mute", muted]))
    }
}

// ── compatibility engine ──────────────────────────────────────────────────────

/// Generation of the live engine; 0 when none.
pub type ActiveGeneration = Arc<AtomicU64>;

/// Rough byte rate of a high-quality AAC stream, for sizing the back buffer.
const BACK_BUFFER_KIB_PER_SEC: u64 = 40;

/// mpv properties equivalent to an [`HlsConfig`].
pub fn hls_properties(cfg: &HlsConfig) -> Vec<(&'static str, Value)> {
    let mut props = vec![
        (
            "demuxer-lavf-o",
            json!(format!(
                "live_start_index=-{},max_reload={},seg_max_retry={}",
                cfg.live_sync_segments, cfg.manifest_max_retry, cfg.level_max_retry
            )),
        ),
        (
            "network-timeout",
            json!(cfg.manifest_timeout.max(cfg.level_timeout).as_secs()),
        ),
        (
            "demuxer-max-back-bytes",
            json!(format!("{}KiB", cfg.back_buffer.as_secs() * BACK_BUFFER_KIB_PER_SEC)),
        ),
    ];
    if cfg.live_duration_infinite {
        props.push(("force-seekable", json!(false)));
    }
    props
}

pub struct MpvEngineFactory {
    handle: Option<MpvHandle>,
    active: ActiveGeneration,
}

impl MpvEngineFactory {
    pub fn new(handle: Option<MpvHandle>, active: ActiveGeneration) -> Self {
        Self { handle, active }
    }
}

impl EngineFactory for MpvEngineFactory {
    fn is_supported(&self) -> bool {
        self.handle.is_some()
    }

    fn create(
        &mut self,
        generation: EngineGeneration,
        config: &HlsConfig,
    ) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        let handle = self.handle.clone().ok_or(EngineError::Closed)?;
        if config.low_latency {
            handle.fire(json!(["apply-profile", "low-latency"]))?;
        }
        for (name, value) in hls_properties(config) {
            handle.fire(json!(["set_property", name, value]))?;
        }
        self.active.store(generation, Ordering::SeqCst);
        Ok(Box::new(MpvHlsEngine {
            handle,
            generation,
            active: self.active.clone(),
            url: None,
            reloads: 0,
            max_reloads: config.manifest_max_retry,
            recoveries: 0,
            max_recoveries: config.level_max_retry,
            destroyed: false,
        }))
    }
}

pub struct MpvHlsEngine {
    handle: MpvHandle,
    generation: EngineGeneration,
    active: ActiveGeneration,
    url: Option<String>,
    reloads: u32,
    max_reloads: u32,
    recoveries: u32,
    max_recoveries: u32,
    destroyed: bool,
}

impl MpvHlsEngine {
    fn reload(&self) -> Result<(), EngineError> {
        if self.destroyed {
            return Err(EngineError::Closed);
        }
        let url = self.url.as_deref().ok_or(EngineError::Closed)?;
        self.handle.fire(json!(["loadfile", url, "replace"]))
    }
}

impl PlaybackEngine for MpvHlsEngine {
    fn load_source(&mut self, url: &str) -> Result<(), EngineError> {
        self.url = Some(url.to_string());
        self.reload()
    }

    fn start_load(&mut self) -> Result<(), EngineError> {
        if self.reloads >= self.max_reloads {
            return Err(EngineError::RetriesExhausted(self.max_reloads));
        }
        self.reloads += 1;
        self.reload()
    }

    fn recover_media_error(&mut self) -> Result<(), EngineError> {
        if self.recoveries >= self.max_recoveries {
            return Err(EngineError::RetriesExhausted(self.max_recoveries));
        }
        self.recoveries += 1;
        self.reload()
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let _ = self
            .active
            .compare_exchange(self.generation, 0, Ordering::SeqCst, Ordering::SeqCst);
        if let Err(e) = self.handle.fire(json!(["stop"])) {
            debug!("mpv: stop on destroy failed: {}", e);
        }
    }
}

// ── event mapping ─────────────────────────────────────────────────────────────

fn error_kind(detail: &str) -> ErrorKind {
    const NETWORK: &[&str] = &["loading failed", "network", "http", "tcp", "connection", "timed out", "tls"];
    const MEDIA: &[&str] = &["unrecognized file format", "no audio", "demux", "decod", "codec"];

    let d = detail.to_ascii_lowercase();
    if NETWORK.iter().any(|k| d.contains(k)) {
        ErrorKind::Network
    } else if MEDIA.iter().any(|k| d.contains(k)) {
        ErrorKind::Media
    } else {
        ErrorKind::Other
    }
}

pub fn classify(event: &MpvEvent) -> Option<EngineSignal> {
    match event.event_name()? {
        "file-loaded" => Some(EngineSignal::Ready),
        "end-file" => {
            if event.str_field("reason")? != "error" {
                return None;
            }
            let detail = event.str_field("file_error").unwrap_or("unknown").to_string();
            Some(EngineSignal::Error {
                fatal: true,
                kind: error_kind(&detail),
                detail,
            })
        }
        "log-message" => {
            let level = event.str_field("level")?;
            if level != "error" && level != "warn" {
                return None;
            }
            let text = event.str_field("text").unwrap_or_default().trim();
            let prefix = event.str_field("prefix").unwrap_or("mpv");
            Some(EngineSignal::Error {
                fatal: false,
                kind: error_kind(text),
                detail: format!("{}: {}", prefix, text),
            })
        }
        _ => None,
    }
}

/// Forward mpv events into the core as engine events for the live engine.
pub fn spawn_event_bridge(
    mut rx: mpsc::Receiver<MpvEvent>,
    active: ActiveGeneration,
    core_tx: mpsc::Sender<CoreEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(evt) = rx.recv().await {
            let Some(signal) = classify(&evt) else {
                continue;
            };
            let generation = active.load(Ordering::SeqCst);
            if generation == 0 {
                debug!("mpv: {:?} with no live engine", signal);
                continue;
            }
            let event = EngineEvent { generation, signal };
            if core_tx.send(CoreEvent::Engine(event)).await.is_err() {
                break;
            }
        }
        debug!("mpv: event bridge exiting");
    })
}

/// Post-connect setup: surface warnings as non-fatal engine errors.
pub async fn configure(handle: &MpvHandle) -> anyhow::Result<()> {
    handle.send(json!(["request_log_messages", "warn"])).await?;
    Ok(())
}
