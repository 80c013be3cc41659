use anyhow::Result;
use std::path::Path;
use turbo_core::AppConfig;

use crate::output::{print_json, redact_config_for_display};

pub(crate) fn run_config(cwd: &Path, json_mode: bool) -> Result<()> {
    let cfg = AppConfig::ensure(cwd)?;
    let display_cfg = redact_config_for_display(&cfg)?;
    if json_mode {
        print_json(&display_cfg)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&display_cfg)?);
    }
    Ok(())
}
