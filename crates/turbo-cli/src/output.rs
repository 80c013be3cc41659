use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use turbo_core::{AppConfig, ResponseDocument};

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn redact_config_for_display(cfg: &AppConfig) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(llm) = value.get_mut("llm").and_then(|entry| entry.as_object_mut())
        && llm.get("api_key").is_some_and(|key| !key.is_null())
    {
        llm.insert("api_key".to_string(), json!("***REDACTED***"));
    }
    Ok(value)
}

/// One line per suggestion, in presentation order.
pub(crate) fn print_suggestions(doc: &ResponseDocument) {
    for replacement in &doc.replacements {
        println!(
            "  replacement {}: {}{}",
            replacement.id,
            replacement.text,
            describe(&replacement.description)
        );
    }
    for insertion in &doc.insertions {
        println!(
            "  insertion {}: {}{}",
            insertion.id,
            insertion.text,
            describe(&insertion.description)
        );
    }
}

fn describe(description: &str) -> String {
    if description.is_empty() {
        String::new()
    } else {
        format!(" ({description})")
    }
}
