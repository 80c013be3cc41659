use anyhow::{Context, Result, anyhow};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use turbo_decoder::{DecodeOutcome, Decoder, FinalVerdict};
use turbo_store::Store;
use uuid::Uuid;

use crate::DecodeArgs;
use crate::output::{print_json, print_suggestions};

pub(crate) fn run_decode(cwd: &Path, args: DecodeArgs, json_mode: bool) -> Result<()> {
    let raw = read_source(cwd, &args)?;
    let decoder = Decoder::default();

    if args.final_verdict {
        let verdict = decoder.finish(&raw);
        if json_mode {
            return print_json(&verdict);
        }
        print_verdict(&verdict);
        return Ok(());
    }

    let (strategy, outcome) = decoder.decode_traced(&raw);
    if json_mode {
        let mut value = serde_json::to_value(&outcome)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("strategy".to_string(), serde_json::json!(strategy));
        }
        return print_json(&value);
    }
    print_outcome(strategy, &outcome);
    Ok(())
}

fn read_source(cwd: &Path, args: &DecodeArgs) -> Result<String> {
    if let Some(turn) = &args.turn {
        let turn_id =
            Uuid::parse_str(turn).with_context(|| format!("invalid turn id {turn:?}"))?;
        let capture = Store::new(cwd)?
            .load_turn_capture(turn_id)?
            .ok_or_else(|| anyhow!("no captured reply for turn {turn_id}"))?;
        return Ok(capture.raw);
    }
    match args.source.as_deref() {
        Some("-") => {
            let mut raw = String::new();
            io::stdin().read_to_string(&mut raw)?;
            Ok(raw)
        }
        Some(path) => {
            let path = cwd.join(path);
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
        }
        None => Store::new(cwd)?
            .latest_turn_capture()?
            .map(|capture| capture.raw)
            .ok_or_else(|| anyhow!("no captured replies yet; pass a file or `-`")),
    }
}

fn print_outcome(strategy: Option<&str>, outcome: &DecodeOutcome) {
    let label = match outcome {
        DecodeOutcome::Empty => "empty",
        DecodeOutcome::Partial(_) => "partial",
        DecodeOutcome::Complete(_) => "complete",
        DecodeOutcome::PlainText(_) => "plain text",
    };
    match strategy {
        Some(strategy) => println!("{label} (via {strategy})"),
        None => println!("{label}"),
    }
    if let Some(doc) = outcome.document() {
        println!("{}", doc.response);
        print_suggestions(doc);
    }
}

fn print_verdict(verdict: &FinalVerdict) {
    match verdict {
        FinalVerdict::Completed { document } => {
            println!("completed");
            println!("{}", document.response);
            print_suggestions(document);
        }
        FinalVerdict::PlainText { document } => {
            println!("plain text");
            println!("{}", document.response);
            print_suggestions(document);
        }
        FinalVerdict::Incomplete { partial } => {
            println!("incomplete");
            if let Some(doc) = partial {
                println!("{}", doc.response);
                print_suggestions(doc);
            }
        }
        FinalVerdict::Malformed {
            diagnostic,
            excerpt,
        } => {
            println!("malformed: {diagnostic}");
            println!("received: {excerpt}");
        }
    }
}
