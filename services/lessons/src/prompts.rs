//! Loading prompt overrides from disk.

use anyhow::Context;
use lingua_core::prompts::PromptLibrary;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Reads every `*.md` file in `prompts_path`, keyed by file stem.
pub fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts directory {}", prompts_path.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt {}", path.display()))?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

/// The built-in prompt library with any overrides found in `prompts_path`.
pub fn prompt_library(prompts_path: Option<&Path>) -> anyhow::Result<PromptLibrary> {
    let Some(path) = prompts_path else {
        return Ok(PromptLibrary::default());
    };
    let overrides = load_prompts(path)?;
    info!(count = overrides.len(), path = %path.display(), "Loaded prompt overrides");
    Ok(PromptLibrary::with_overrides(overrides))
}
