//! blocking client for ollama's `/api/generate` streaming endpoint.
//!
//! the response body is newline-delimited json; every non-blank line is one
//! frame and its `response` field is one chunk of text. chunks are handed to
//! the caller as soon as their line is read, so this must run off the thread
//! that owns the ui.

use bevy::log::{debug, info};
use bevy::prelude::Resource;
use flume::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use ureq::Agent;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434/api/generate";

/// where and how to reach the generate endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    pub endpoint: String,
    /// used when a session doesn't name a model.
    pub model: String,
    pub connect_timeout: Option<Duration>,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: crate::catalog::DEFAULT_MODEL.to_string(),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("connect error: {0}")]
    Connect(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid json on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("transport error: {0}")]
    Transport(io::Error),
    #[error("cancelled")]
    Cancelled,
}

impl From<ureq::Error> for GenerateError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => GenerateError::Status(code),
            e @ ureq::Error::Timeout(_) => GenerateError::Timeout(e.to_string()),
            e @ (ureq::Error::HostNotFound | ureq::Error::ConnectionFailed) => {
                GenerateError::Connect(e.to_string())
            }
            ureq::Error::Io(e) => e.into(),
            other => GenerateError::Protocol(other.to_string()),
        }
    }
}

impl From<io::Error> for GenerateError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                GenerateError::Timeout(err.to_string())
            }
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotConnected => {
                GenerateError::Connect(err.to_string())
            }
            _ => GenerateError::Transport(err),
        }
    }
}

/// shared flag that stops an in-flight stream.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// what one decoded stream looked like.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// lines read, blank ones included
    pub lines: usize,
    pub chunks: usize,
    pub bytes: usize,
    /// reported by the endpoint on its final `done` frame, if at all
    pub eval_count: Option<u64>,
    pub total_duration: Option<Duration>,
}

/// decode an ndjson generate stream, calling `on_chunk` once per non-blank
/// line in arrival order. a frame without `response` yields an empty chunk.
/// stops with [`GenerateError::Json`] on the first malformed line; chunks
/// already handed out stay handed out.
pub fn decode_stream<R: BufRead>(
    mut reader: R,
    cancel: &CancelHandle,
    mut on_chunk: impl FnMut(String),
) -> Result<StreamStats, GenerateError> {
    let mut stats = StreamStats::default();
    let mut line = Vec::with_capacity(256);
    loop {
        if cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }
        line.clear();
        let n = match reader.read_until(b'\n', &mut line) {
            Ok(n) => n,
            Err(_) if cancel.is_cancelled() => return Err(GenerateError::Cancelled),
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Ok(stats);
        }
        stats.lines += 1;
        stats.bytes += n;
        if cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }

        let frame = line.trim_ascii();
        if frame.is_empty() {
            continue;
        }
        // only the json itself must be valid; fields are read leniently
        let frame: Value = serde_json::from_slice(frame).map_err(|source| {
            GenerateError::Json {
                line: stats.lines,
                source,
            }
        })?;
        if frame.get("done").and_then(Value::as_bool).unwrap_or(false) {
            stats.eval_count = frame.get("eval_count").and_then(Value::as_u64);
            stats.total_duration = frame
                .get("total_duration")
                .and_then(Value::as_u64)
                .map(Duration::from_nanos);
        }
        stats.chunks += 1;
        let text = frame.get("response").and_then(Value::as_str).unwrap_or_default();
        on_chunk(text.to_string());
    }
}

// how often a reader waiting on the network re-checks its cancel flag
const CANCEL_POLL: Duration = Duration::from_millis(50);

enum BodyMsg {
    Bytes(Vec<u8>),
    Failed(GenerateError),
}

/// the response body as seen from the decoding thread. bytes come from a
/// separate exchange thread, so a stalled server never blocks past a cancel.
struct CancellableBody {
    rx: Receiver<BodyMsg>,
    cancel: CancelHandle,
    pending: Vec<u8>,
    pos: usize,
    failure: Option<GenerateError>,
}

impl CancellableBody {
    fn new(rx: Receiver<BodyMsg>, cancel: CancelHandle) -> Self {
        Self { rx, cancel, pending: Vec::new(), pos: 0, failure: None }
    }
}

impl Read for CancellableBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            if self.cancel.is_cancelled() {
                return Err(io::Error::other("cancelled"));
            }
            match self.rx.recv_timeout(CANCEL_POLL) {
                Ok(BodyMsg::Bytes(bytes)) => {
                    self.pending = bytes;
                    self.pos = 0;
                }
                Ok(BodyMsg::Failed(err)) => {
                    let msg = err.to_string();
                    self.failure = Some(err);
                    return Err(io::Error::other(msg));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// runs the http exchange and forwards raw body bytes. stops as soon as the
/// receiving side is gone; dropping the response closes the connection.
fn pump_exchange(agent: Agent, endpoint: String, model: String, prompt: String, tx: Sender<BodyMsg>) {
    let res = agent
        .post(&endpoint)
        .header("accept", "application/x-ndjson")
        .send_json(GenerateBody { model: &model, prompt: &prompt });
    let mut reader = match res {
        Ok(res) => res.into_body().into_reader(),
        Err(err) => {
            let _ = tx.send(BodyMsg::Failed(err.into()));
            return;
        }
    };
    let mut buf = vec![0u8; 8192];
    while !tx.is_disconnected() {
        match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if tx.send(BodyMsg::Bytes(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(BodyMsg::Failed(e.into()));
                return;
            }
        }
    }
}

/// one agent per client; clones share the connection pool.
#[derive(Resource, Clone)]
pub struct GenerateClient {
    agent: Agent,
    config: GenerateConfig,
}

impl Default for GenerateClient {
    fn default() -> Self {
        Self::new(GenerateConfig::default())
    }
}

impl GenerateClient {
    pub fn new(config: GenerateConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_connect(config.connect_timeout)
            .build()
            .into();
        Self { agent, config }
    }

    pub fn config(&self) -> &GenerateConfig {
        &self.config
    }

    /// post `{model, prompt}` and stream the reply through `on_chunk`.
    /// blocks until the body ends, fails, or `cancel` is set; a cancel is
    /// noticed within `CANCEL_POLL` even while waiting on headers or a
    /// stalled body.
    pub fn stream(
        &self,
        model: &str,
        prompt: &str,
        cancel: &CancelHandle,
        on_chunk: impl FnMut(String),
    ) -> Result<StreamStats, GenerateError> {
        let model = if model.trim().is_empty() { self.config.model.as_str() } else { model };
        info!(target: "bevy_ollama",
            "generate: POST {} model={} prompt_len={}",
            self.config.endpoint, model, prompt.len()
        );

        let (tx, rx) = flume::bounded(64);
        let (agent, endpoint) = (self.agent.clone(), self.config.endpoint.clone());
        let (model_owned, prompt_owned) = (model.to_string(), prompt.to_string());
        std::thread::Builder::new()
            .name("bevy_ollama-generate".into())
            .spawn(move || pump_exchange(agent, endpoint, model_owned, prompt_owned, tx))?;

        // a cancel drops `body`, which lets the exchange thread hang up
        let mut body = CancellableBody::new(rx, cancel.clone());
        let stats = match decode_stream(BufReader::new(&mut body), cancel, on_chunk) {
            Ok(stats) => stats,
            Err(_) if cancel.is_cancelled() => return Err(GenerateError::Cancelled),
            Err(err) => return Err(body.failure.take().unwrap_or(err)),
        };
        debug!(target: "bevy_ollama",
            "generate: stream ended lines={} chunks={} bytes={} eval_count={:?} total_duration={:?}",
            stats.lines, stats.chunks, stats.bytes, stats.eval_count, stats.total_duration
        );
        Ok(stats)
    }

    /// blocking helper that waits for the whole reply.
    pub fn generate_text(&self, model: &str, prompt: &str) -> Result<String, GenerateError> {
        let mut out = String::new();
        self.stream(model, prompt, &CancelHandle::new(), |chunk| out.push_str(&chunk))?;
        Ok(out)
    }
}
