//! Fixtures shared by the workspace tests: SSE body builders, scripted
//! transports, chunking readers and a local HTTP server speaking the
//! chat-completions streaming protocol.

use serde_json::json;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use turbo_core::ChatRequest;
use turbo_llm::{ChatTransport, StreamBody, TransportError};

// ── SSE builders ────────────────────────────────────────────────────────

/// One `data:` event carrying `delta` as `choices[0].delta.content`.
pub fn sse_event(delta: &str) -> String {
    let payload = json!({"choices": [{"index": 0, "delta": {"content": delta}}]});
    format!("data: {payload}\n\n")
}

pub fn sse_error_event(message: &str) -> String {
    let payload = json!({"error": {"message": message, "type": "server_error"}});
    format!("data: {payload}\n\n")
}

/// Events for every delta followed by the `[DONE]` sentinel.
pub fn sse_body(deltas: &[&str]) -> String {
    let mut body: String = deltas.iter().map(|delta| sse_event(delta)).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

/// Split `text` into deltas of at most `size` characters.
pub fn char_deltas(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

// ── Readers ─────────────────────────────────────────────────────────────

/// Yields its data in fixed-size byte chunks (which may split UTF-8
/// sequences), then optionally fails instead of reporting end of input.
pub struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    fail_with: Option<io::ErrorKind>,
}

impl ChunkedReader {
    pub fn new(data: impl Into<Vec<u8>>, chunk: usize) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            chunk: chunk.max(1),
            fail_with: None,
        }
    }

    pub fn failing(data: impl Into<Vec<u8>>, chunk: usize, kind: io::ErrorKind) -> Self {
        Self {
            fail_with: Some(kind),
            ..Self::new(data, chunk)
        }
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.data.len() {
            return match self.fail_with {
                Some(kind) => Err(io::Error::new(kind, "connection reset by peer")),
                None => Ok(0),
            };
        }
        let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Reads from `inner`, flipping `flag` once `after_bytes` bytes have been
/// handed out. Lets tests cancel a turn from inside the stream.
pub struct TripwireReader<R> {
    inner: R,
    seen: usize,
    after_bytes: usize,
    flag: Arc<AtomicBool>,
}

impl<R: Read> TripwireReader<R> {
    pub fn new(inner: R, after_bytes: usize, flag: Arc<AtomicBool>) -> Self {
        Self {
            inner,
            seen: 0,
            after_bytes,
            flag,
        }
    }
}

impl<R: Read> Read for TripwireReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.seen += n;
        if self.seen >= self.after_bytes {
            self.flag.store(true, Ordering::SeqCst);
        }
        Ok(n)
    }
}

// ── Scripted transport ──────────────────────────────────────────────────

pub enum Scripted {
    Body(Box<dyn Read + Send>),
    Fail(TransportError),
}

impl Scripted {
    pub fn sse(body: impl Into<Vec<u8>>, chunk: usize) -> Self {
        Self::Body(Box::new(ChunkedReader::new(body, chunk)))
    }
}

/// Transport replaying pre-recorded outcomes in order and recording every
/// request it receives.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, item: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl ChatTransport for ScriptedTransport {
    fn open_stream(&self, request: &ChatRequest) -> Result<StreamBody, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match next {
            Some(Scripted::Body(body)) => Ok(body),
            Some(Scripted::Fail(err)) => Err(err),
            None => Err(TransportError::Network("script exhausted".to_string())),
        }
    }
}

// ── Local HTTP server ───────────────────────────────────────────────────

/// Serves scripted responses on 127.0.0.1 and records request bodies.
pub struct MockHttpServer {
    pub endpoint: String,
    bodies: Arc<Mutex<Vec<String>>>,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
}

impl MockResponse {
    pub fn sse(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

impl MockHttpServer {
    pub fn start(responses: Vec<MockResponse>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let bodies_thread = Arc::clone(&bodies);
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let mut served = 0usize;
            loop {
                if rx.try_recv().is_ok() {
                    break;
                }
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(body) = read_http_request(&mut stream)
                            && let Ok(mut bodies) = bodies_thread.lock()
                        {
                            bodies.push(body);
                        }
                        let Some(selected) = responses
                            .get(served)
                            .or_else(|| responses.last())
                            .cloned()
                        else {
                            break;
                        };
                        served += 1;
                        let head = format!(
                            "HTTP/1.1 {} Mock\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            selected.status,
                            selected.body.len()
                        );
                        let _ = stream.write_all(head.as_bytes());
                        let _ = stream.write_all(selected.body.as_bytes());
                        let _ = stream.flush();
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(2));
                    }
                    Err(_) => break,
                }
            }
        });
        Ok(Self {
            endpoint: format!("http://{addr}/v1/chat/completions"),
            bodies,
            stop_tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// JSON bodies of the requests served so far.
    pub fn request_bodies(&self) -> Vec<String> {
        self.bodies
            .lock()
            .map(|bodies| bodies.clone())
            .unwrap_or_default()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_http_request(stream: &mut TcpStream) -> io::Result<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    let header_end = loop {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Ok(String::new());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(idx) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break idx + 4;
        }
    };
    let content_length = String::from_utf8_lossy(&buffer[..header_end])
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    Ok(String::from_utf8_lossy(&body).to_string())
}

// ── Workspaces ──────────────────────────────────────────────────────────

/// Temporary workspace whose `.turbo/settings.local.json` holds `settings`.
pub fn workspace_with_settings(settings: &serde_json::Value) -> io::Result<(TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let runtime = turbo_core::runtime_dir(dir.path());
    std::fs::create_dir_all(&runtime)?;
    std::fs::write(
        runtime.join("settings.local.json"),
        serde_json::to_vec_pretty(settings).map_err(io::Error::other)?,
    )?;
    let path = dir.path().to_path_buf();
    Ok((dir, path))
}
