//! Turn logging for the writing assistant.
//!
//! Every structured event lands in `.turbo/observe.log` as
//! `<rfc3339> EVENT <name> <envelope json>`; warnings as `<rfc3339> WARN <msg>`.
//! Sequence numbers continue from the last event already in the log, so they
//! stay increasing across separate CLI runs sharing a workspace.

use anyhow::Result;
use chrono::Utc;
use reqwest::blocking::Client;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use turbo_core::{EventEnvelope, EventKind, TelemetryConfig, runtime_dir};
use uuid::Uuid;

const LOG_FILE: &str = "observe.log";
const EVENT_MARKER: &str = " EVENT ";
const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared between the CLI thread and the turn worker behind an `Arc`.
pub struct Observer {
    log: LogFile,
    telemetry: Option<Telemetry>,
    verbose: AtomicBool,
    next_seq: AtomicU64,
}

#[derive(Debug, Clone)]
struct LogFile {
    path: PathBuf,
}

impl LogFile {
    fn append(&self, level: &str, body: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {level} {body}", Utc::now().to_rfc3339())
    }

    /// Envelopes in file order; lines that are not events are skipped.
    fn events(&self) -> Result<Vec<EventEnvelope>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(raw.lines().filter_map(parse_event_line).collect())
    }
}

fn parse_event_line(line: &str) -> Option<EventEnvelope> {
    let (_, rest) = line.split_once(EVENT_MARKER)?;
    let (_, payload) = rest.split_once(' ')?;
    serde_json::from_str(payload).ok()
}

struct Telemetry {
    endpoint: String,
    client: Client,
}

impl Telemetry {
    fn from_config(cfg: &TelemetryConfig) -> Result<Option<Self>> {
        let endpoint = match (&cfg.endpoint, cfg.enabled) {
            (Some(endpoint), true) => endpoint.clone(),
            _ => return Ok(None),
        };
        let client = Client::builder().timeout(TELEMETRY_TIMEOUT).build()?;
        Ok(Some(Self { endpoint, client }))
    }

    /// Fire and forget; a failed POST becomes a log line.
    fn post(&self, event: &EventEnvelope, log: &LogFile) {
        let body = json!({ "source": "turbo", "event": event });
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let log = log.clone();
        std::thread::spawn(move || {
            if let Err(err) = client.post(&endpoint).json(&body).send() {
                let _ = log.append("TELEMETRY_ERROR", &err.to_string());
            }
        });
    }
}

impl Observer {
    pub fn new(workspace: &Path, telemetry_cfg: &TelemetryConfig) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        let log = LogFile {
            path: dir.join(LOG_FILE),
        };
        let last_seq = log.events()?.iter().map(|e| e.seq_no).max().unwrap_or(0);
        Ok(Self {
            telemetry: Telemetry::from_config(telemetry_cfg)?,
            log,
            verbose: AtomicBool::new(false),
            next_seq: AtomicU64::new(last_seq + 1),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log.path
    }

    /// Stamp `kind` for `turn_id` with the next sequence number and record it.
    pub fn record(&self, turn_id: Uuid, kind: EventKind) -> Result<EventEnvelope> {
        let event = EventEnvelope {
            seq_no: self.next_seq.fetch_add(1, Ordering::Relaxed),
            at: Utc::now(),
            turn_id,
            kind,
        };
        self.record_event(&event)?;
        Ok(event)
    }

    pub fn record_event(&self, event: &EventEnvelope) -> Result<()> {
        let name = event.kind.name();
        self.log
            .append("EVENT", &format!("{name} {}", serde_json::to_string(event)?))?;
        self.verbose_log(&format!("#{} {name} turn={}", event.seq_no, event.turn_id));
        if let Some(telemetry) = &self.telemetry {
            telemetry.post(event, &self.log);
        }
        Ok(())
    }

    /// Events recorded for one turn, oldest first.
    pub fn turn_events(&self, turn_id: Uuid) -> Result<Vec<EventEnvelope>> {
        let mut events = self.log.events()?;
        events.retain(|e| e.turn_id == turn_id);
        Ok(events)
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// `[turbo]`-prefixed stderr line, only in verbose mode.
    pub fn verbose_log(&self, msg: &str) {
        if self.is_verbose() {
            eprintln!("[turbo] {msg}");
        }
    }

    /// Always written to stderr and the log.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[turbo WARN] {msg}");
        let _ = self.log.append("WARN", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;
    use turbo_core::TurnState;

    fn observer(workspace: &Path) -> Observer {
        Observer::new(workspace, &TelemetryConfig::default()).expect("observer")
    }

    fn started() -> EventKind {
        EventKind::TurnStarted {
            model: "gpt-3.5-turbo".to_string(),
        }
    }

    #[test]
    fn events_are_sequenced_and_read_back_per_turn() {
        let workspace = tempfile::tempdir().expect("workspace");
        let observer = observer(workspace.path());
        let turn_id = Uuid::now_v7();
        let first = observer.record(turn_id, started()).expect("record");
        observer.record(Uuid::now_v7(), started()).expect("other turn");
        let finished = observer
            .record(
                turn_id,
                EventKind::TurnFinished {
                    state: TurnState::Completed,
                    raw_chars: 42,
                    detail: None,
                },
            )
            .expect("record");
        assert_eq!(finished.seq_no, first.seq_no + 2);

        let log = fs::read_to_string(observer.log_path()).expect("log");
        assert!(log.contains("EVENT turn.started"));
        assert!(log.contains("\"state\":\"completed\""));

        let events = observer.turn_events(turn_id).expect("events");
        let seqs: Vec<u64> = events.iter().map(|e| e.seq_no).collect();
        assert_eq!(seqs, vec![first.seq_no, finished.seq_no]);
    }

    #[test]
    fn sequence_continues_across_observers() {
        let workspace = tempfile::tempdir().expect("workspace");
        let turn_id = Uuid::now_v7();
        let before = observer(workspace.path())
            .record(turn_id, started())
            .expect("record");
        let reopened = observer(workspace.path());
        reopened.warn_log("between runs");
        let after = reopened.record(turn_id, started()).expect("record");
        assert_eq!(after.seq_no, before.seq_no + 1);
        assert_eq!(reopened.turn_events(turn_id).expect("events").len(), 2);
    }

    #[test]
    fn warnings_reach_the_log_file() {
        let workspace = tempfile::tempdir().expect("workspace");
        let observer = observer(workspace.path());
        observer.warn_log("Failed to parse SSE data");
        let log = fs::read_to_string(observer.log_path()).expect("log");
        assert!(log.contains("WARN Failed to parse SSE data"));
        assert!(observer.turn_events(Uuid::now_v7()).expect("events").is_empty());
    }

    #[test]
    fn telemetry_posts_the_envelope() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let collector = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            let mut chunk = [0_u8; 4096];
            while !String::from_utf8_lossy(&request).contains("\"source\":\"turbo\"") {
                let n = stream.read(&mut chunk).expect("read request");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            let _ = stream.write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n");
            String::from_utf8_lossy(&request).to_string()
        });

        let workspace = tempfile::tempdir().expect("workspace");
        let observer = Observer::new(
            workspace.path(),
            &TelemetryConfig {
                enabled: true,
                endpoint: Some(format!("http://{addr}/collect")),
            },
        )
        .expect("observer");
        observer
            .record(
                Uuid::now_v7(),
                EventKind::SseLineRejected {
                    reason: "expected value".to_string(),
                },
            )
            .expect("record event");
        let request = collector.join().expect("join collector");
        assert!(request.starts_with("POST /collect"));
        assert!(request.contains("sse_line_rejected"));
    }
}
