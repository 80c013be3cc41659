use anyhow::{Context, Result, anyhow};
use serde_json::json;
use std::fs;
use std::path::Path;
use uuid::Uuid;
use turbo_session::ApplyOutcome;

use crate::ApplyArgs;
use crate::context::{Runtime, load_buffer};
use crate::output::print_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Replacement,
    Insertion,
}

impl Target {
    fn as_str(self) -> &'static str {
        match self {
            Self::Replacement => "replacement",
            Self::Insertion => "insertion",
        }
    }
}

pub(crate) fn run_apply(cwd: &Path, args: ApplyArgs, json_mode: bool, verbose: bool) -> Result<()> {
    let rt = Runtime::load(cwd, verbose)?;
    let mut session = rt.session(None)?;
    let message_id = Uuid::parse_str(&args.message_id)
        .with_context(|| format!("invalid message id {:?}", args.message_id))?;
    let message = session
        .message(message_id)
        .ok_or_else(|| anyhow!("message {message_id} not found"))?;

    let target = if message
        .replacements
        .iter()
        .any(|r| r.id == args.suggestion_id)
    {
        Target::Replacement
    } else if message.insertions.iter().any(|i| i.id == args.suggestion_id) {
        Target::Insertion
    } else {
        return Err(anyhow!("suggestion {:?} not found", args.suggestion_id));
    };

    let path = cwd.join(&args.file);
    let mut buffer = load_buffer(&path, args.select.as_deref(), args.cursor)?;
    let outcome = match target {
        Target::Replacement => {
            session.use_replacement(message_id, &args.suggestion_id, &mut buffer)?
        }
        Target::Insertion => session.use_insertion(message_id, &args.suggestion_id, &mut buffer)?,
    };

    if outcome == ApplyOutcome::Applied {
        fs::write(&path, buffer.text()).with_context(|| format!("writing {}", path.display()))?;
        if rt.cfg.chat.auto_save {
            rt.store.save_editor_content(buffer.text())?;
        }
        // Used markers persist even when history auto-save is off.
        rt.store.save_chat_history(&session.to_stored())?;
    }
    rt.observer.verbose_log(&format!(
        "{} {} on message {message_id}: {outcome:?}",
        target.as_str(),
        args.suggestion_id
    ));

    if json_mode {
        return print_json(&json!({
            "message_id": message_id,
            "suggestion_id": args.suggestion_id,
            "kind": target.as_str(),
            "outcome": outcome,
            "file": path,
        }));
    }
    match outcome {
        ApplyOutcome::Applied => println!(
            "Applied {} {} to {}",
            target.as_str(),
            args.suggestion_id,
            path.display()
        ),
        ApplyOutcome::AlreadyUsed => println!(
            "{} {} was already used; {} unchanged",
            target.as_str(),
            args.suggestion_id,
            path.display()
        ),
    }
    Ok(())
}
