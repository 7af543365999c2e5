use std::path::{Path, PathBuf};

/// Application directory (~/.chat_session)
pub fn app_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".chat_session")
}

/// Path of config.json inside the application directory
pub fn config_json_path() -> PathBuf {
    app_dir().join("config.json")
}

/// Default directory for persisted conversations
pub fn conversations_dir() -> PathBuf {
    app_dir().join("conversations")
}

/// Load a JSON config file
pub fn load_config_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
}

/// Load a TOML config file
pub fn load_config_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
}
