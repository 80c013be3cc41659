use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use turbo_core::AppConfig;
use turbo_observe::Observer;
use turbo_session::{ChatSession, TextBuffer};
use turbo_store::Store;

/// Everything a command needs from the workspace.
pub(crate) struct Runtime {
    pub cfg: AppConfig,
    pub store: Store,
    pub observer: Arc<Observer>,
}

impl Runtime {
    pub fn load(cwd: &Path, verbose: bool) -> Result<Self> {
        let cfg = AppConfig::ensure(cwd)?;
        let store = Store::new(cwd)?;
        let observer = Arc::new(Observer::new(cwd, &cfg.telemetry)?);
        observer.set_verbose(verbose);
        Ok(Self {
            cfg,
            store,
            observer,
        })
    }

    /// Chat session restored from the stored history.
    pub fn session(&self, model: Option<&str>) -> Result<ChatSession> {
        let mut session = ChatSession::new(
            &self.cfg.llm.provider,
            &self.cfg.llm.default_model,
            self.cfg.chat.clone(),
        )
        .with_observer(Arc::clone(&self.observer));
        if let Some(model) = model {
            session.set_model(model);
        }
        session.restore(self.store.load_chat_history()?);
        self.observer.verbose_log(&format!(
            "restored {} messages, model={}",
            session.messages().len(),
            session.model()
        ));
        Ok(session)
    }

    pub fn save_session(&self, session: &ChatSession) -> Result<()> {
        if !self.cfg.chat.auto_save {
            return Ok(());
        }
        self.store.save_chat_history(&session.to_stored())
    }
}

/// Parse a `START:END` character range.
pub(crate) fn parse_range(range: &str) -> Result<(usize, usize)> {
    let (start, end) = range
        .split_once(':')
        .ok_or_else(|| anyhow!("expected START:END, got {range:?}"))?;
    let start = start.trim().parse().context("invalid range start")?;
    let end = end.trim().parse().context("invalid range end")?;
    Ok((start, end))
}

/// Editor buffer for `path` with the requested selection or cursor.
pub(crate) fn load_buffer(
    path: &Path,
    select: Option<&str>,
    cursor: Option<usize>,
) -> Result<TextBuffer> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut buffer = TextBuffer::new(text);
    if let Some(range) = select {
        let (start, end) = parse_range(range)?;
        buffer.select(start, end)?;
    }
    if let Some(position) = cursor {
        if select.is_some() {
            return Err(anyhow!("--cursor and --select are mutually exclusive"));
        }
        buffer.set_cursor(position)?;
    }
    Ok(buffer)
}

/// Selected text of `file` for the chat prompt.
pub(crate) fn selection_text(file: Option<&PathBuf>, select: Option<&str>) -> Result<Option<String>> {
    match (file, select) {
        (Some(path), Some(range)) => {
            let buffer = load_buffer(path, Some(range), None)?;
            Ok(buffer.selected_text().map(str::to_string))
        }
        (Some(path), None) => Ok(Some(
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        )),
        (None, Some(_)) => Err(anyhow!("--select requires --file")),
        (None, None) => Ok(None),
    }
}
