use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// `$CURBSIDE_HOME`, or `~/.curbside`.
pub fn curbside_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("CURBSIDE_HOME") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".curbside"))
}

pub fn ensure_curbside_home() -> Result<PathBuf> {
    let dir = curbside_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// Cloud access token, from the environment only.
pub fn access_token() -> Option<String> {
    std::env::var("CURBSIDE_ACCESS_TOKEN")
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
