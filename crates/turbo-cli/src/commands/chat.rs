use anyhow::{Result, anyhow};
use chrono::Utc;
use serde_json::json;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, mpsc};
use std::thread;
use turbo_core::{MessageRole, model_display_name};
use turbo_llm::{ChatTransport, ProviderRegistry};
use turbo_session::{ChatSession, PendingTurn, SnapshotCallback, TurnSnapshot};
use turbo_store::{Store, TurnCapture};

use crate::context::{Runtime, selection_text};
use crate::output::{print_json, print_suggestions};
use crate::{ChatArgs, HistoryArgs, RetryArgs};

pub(crate) fn run_chat(cwd: &Path, args: ChatArgs, json_mode: bool, verbose: bool) -> Result<()> {
    let rt = Runtime::load(cwd, verbose)?;
    let mut session = rt.session(args.model.as_deref())?;
    let selection = selection_text(args.file.as_ref(), args.select.as_deref())?;
    let pending = session
        .submit(&args.prompt, selection.as_deref())
        .ok_or_else(|| anyhow!("prompt is empty"))?;
    stream_turn(&rt, &mut session, pending, json_mode)
}

pub(crate) fn run_retry(cwd: &Path, args: RetryArgs, json_mode: bool, verbose: bool) -> Result<()> {
    let rt = Runtime::load(cwd, verbose)?;
    let mut session = rt.session(args.model.as_deref())?;
    let pending = session
        .retry()
        .ok_or_else(|| anyhow!("no user message to retry"))?;
    stream_turn(&rt, &mut session, pending, json_mode)
}

pub(crate) fn run_history(cwd: &Path, args: HistoryArgs, json_mode: bool) -> Result<()> {
    let store = Store::new(cwd)?;
    if args.clear {
        store.clear_chat_history()?;
        if json_mode {
            print_json(&json!({"cleared": true}))?;
        } else {
            println!("Chat history cleared.");
        }
        return Ok(());
    }

    let history = store.load_chat_history()?;
    if json_mode {
        return print_json(&history);
    }
    if history.is_empty() {
        println!("No messages yet.");
    }
    for message in &history {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        println!("{} [{role}] {}", message.id, message.content);
        for replacement in &message.replacements {
            let used = message.used_replacements.contains(&replacement.id);
            println!("  replacement {}{}", replacement.id, if used { " (used)" } else { "" });
        }
        for insertion in &message.insertions {
            let used = message.used_insertions.contains(&insertion.id);
            println!("  insertion {}{}", insertion.id, if used { " (used)" } else { "" });
        }
    }
    Ok(())
}

pub(crate) fn run_new(cwd: &Path, json_mode: bool) -> Result<()> {
    let store = Store::new(cwd)?;
    store.clear_chat_history()?;
    if json_mode {
        print_json(&json!({"new_conversation": true}))?;
    } else {
        println!("Started a new conversation.");
    }
    Ok(())
}

/// Stream `pending` on a worker thread while this thread prints progress and
/// routes snapshots into the session.
fn stream_turn(
    rt: &Runtime,
    session: &mut ChatSession,
    pending: PendingTurn,
    json_mode: bool,
) -> Result<()> {
    let transport = ProviderRegistry::default().create(&rt.cfg.llm.provider, &rt.cfg.llm)?;
    rt.observer.verbose_log(&format!(
        "turn {} via {} ({})",
        pending.turn_id,
        rt.cfg.llm.provider,
        model_display_name(session.model())
    ));

    let (tx, rx) = mpsc::channel::<TurnSnapshot>();
    let callback: SnapshotCallback = Arc::new(move |snapshot| {
        let _ = tx.send(snapshot);
    });
    let mut controller = session.controller(&pending, callback);
    let request = pending.request.clone();
    let transport: &dyn ChatTransport = transport.as_ref();
    let mut printer = ProgressPrinter::new(!json_mode);

    let (terminal, raw) = thread::scope(|scope| -> Result<(TurnSnapshot, String)> {
        let worker = scope.spawn(move || {
            let terminal = controller.run(transport, &request);
            (terminal, controller.raw().to_string())
        });
        for snapshot in rx.iter() {
            printer.show(&snapshot)?;
            session.apply_snapshot(&snapshot);
        }
        worker.join().map_err(|_| anyhow!("turn worker panicked"))
    })?;

    rt.store.save_turn_capture(&TurnCapture {
        turn_id: pending.turn_id,
        message_id: pending.message_id,
        state: terminal.state,
        raw,
        finished_at: Utc::now(),
    })?;
    rt.save_session(session)?;

    if session.credential_invalid() {
        eprintln!(
            "API key was rejected. Set {} or llm.api_key in .turbo/settings.json.",
            rt.cfg.llm.api_key_env
        );
    }

    if json_mode {
        return print_json(&json!({
            "turn_id": pending.turn_id,
            "message_id": pending.message_id,
            "model": session.model(),
            "model_name": model_display_name(session.model()),
            "state": terminal.state,
            "document": terminal.document,
            "failure": terminal.failure,
        }));
    }
    printer.finish(&terminal)?;
    print_suggestions(&terminal.document);
    println!("message {}", pending.message_id);
    Ok(())
}

/// Prints only the response text that arrived since the last snapshot.
struct ProgressPrinter {
    enabled: bool,
    shown: String,
}

impl ProgressPrinter {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            shown: String::new(),
        }
    }

    fn show(&mut self, snapshot: &TurnSnapshot) -> Result<()> {
        if !self.enabled || snapshot.placeholder || snapshot.is_terminal() {
            return Ok(());
        }
        let response = &snapshot.document.response;
        if let Some(fresh) = response.strip_prefix(self.shown.as_str())
            && !fresh.is_empty()
        {
            print!("{fresh}");
            io::stdout().flush()?;
            self.shown = response.clone();
        }
        Ok(())
    }

    fn finish(&mut self, terminal: &TurnSnapshot) -> Result<()> {
        let response = &terminal.document.response;
        match response.strip_prefix(self.shown.as_str()) {
            Some(rest) => println!("{rest}"),
            None => {
                if !self.shown.is_empty() {
                    println!();
                }
                println!("{response}");
            }
        }
        self.shown = response.clone();
        Ok(())
    }
}
