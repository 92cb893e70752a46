//! Standard locations for mixdown files

use std::path::PathBuf;

/// Directory holding mixdown's configuration
///
/// Returns `<config dir>/mixdown`, e.g. `~/.config/mixdown` on Linux, or
/// `./mixdown` when the platform has no config directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mixdown")
}

/// Path of the engine configuration file
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("mixdown/config.yaml"));
        assert!(path.starts_with(config_dir()));
    }
}
