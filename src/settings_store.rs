use crate::settings::OverlaySettings;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE_NAME: &str = "chroma_overlay.json";

pub fn settings_path_from_exe_path(exe_path: &Path) -> Result<PathBuf> {
    let parent = exe_path
        .parent()
        .ok_or_else(|| anyhow!("executable path has no parent: {}", exe_path.display()))?;
    Ok(parent.join(SETTINGS_FILE_NAME))
}

pub fn resolve_settings_path() -> Result<PathBuf> {
    let exe_path = std::env::current_exe().context("resolve current executable")?;
    settings_path_from_exe_path(&exe_path)
}

pub fn load() -> Result<OverlaySettings> {
    let settings_path = resolve_settings_path()?;
    load_from_path(&settings_path)
}

pub fn save(settings: &OverlaySettings) -> Result<PathBuf> {
    let settings_path = resolve_settings_path()?;
    save_to_path(&settings_path, settings)?;
    Ok(settings_path)
}

/// Missing or blank files load as defaults.
pub fn load_from_path(settings_path: &Path) -> Result<OverlaySettings> {
    if !settings_path.exists() {
        return Ok(OverlaySettings::default());
    }

    let content = std::fs::read_to_string(settings_path)
        .with_context(|| format!("read overlay settings file {}", settings_path.display()))?;

    if content.trim().is_empty() {
        return Ok(OverlaySettings::default());
    }

    serde_json::from_str(&content).with_context(|| {
        format!(
            "deserialize overlay settings file {}",
            settings_path.display()
        )
    })
}

pub fn save_to_path(settings_path: &Path, settings: &OverlaySettings) -> Result<()> {
    if let Some(parent) = settings_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create settings parent folder {}", parent.display()))?;
    }

    let mut sanitized = settings.clone();
    sanitized.sanitize();
    let json = serde_json::to_string_pretty(&sanitized).context("serialize overlay settings")?;
    std::fs::write(settings_path, json)
        .with_context(|| format!("write overlay settings file {}", settings_path.display()))
}
