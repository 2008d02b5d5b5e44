// src/infra/paths.rs — Path management
//
// All paths respect the RLM_HOME environment variable for isolation.
// When RLM_HOME is set, config and traces live under that directory.
// When unset, config uses ~/.rlm/ and traces use XDG_DATA_HOME/rlm.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Returns the RLM_HOME override, if set.
fn rlm_home() -> Option<PathBuf> {
    std::env::var_os("RLM_HOME").map(PathBuf::from)
}

/// Home directory, falling back to the working directory when there is none.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $RLM_HOME/ or ~/.rlm/
pub fn config_dir() -> PathBuf {
    if let Some(home) = rlm_home() {
        return home;
    }
    dirs_home().join(".rlm")
}

/// Data directory: $RLM_HOME/data/ or ~/.local/share/rlm/
pub fn data_dir() -> PathBuf {
    if let Some(home) = rlm_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "rlm")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Default location for `--trace` files given without a directory.
pub fn traces_dir() -> PathBuf {
    data_dir().join("traces")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
