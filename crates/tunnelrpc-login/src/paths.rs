//! Where the agent looks for its configuration file

use std::path::{Path, PathBuf};

/// File names from which configuration is read, in order of preference
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["config.yml", "config.yaml"];

/// Directories searched for a configuration file, in order of preference
pub const DEFAULT_CONFIG_DIRS: [&str; 3] = ["~/.tunnelrpc", "/usr/local/etc/tunnelrpc", "/etc/tunnelrpc"];

/// Expand a leading `~` to the home directory
pub fn expand_home(dir: &str) -> Option<PathBuf> {
    match dir.strip_prefix('~') {
        Some(rest) => {
            let home = dirs::home_dir()?;
            Some(home.join(rest.trim_start_matches('/')))
        }
        None => Some(PathBuf::from(dir)),
    }
}

/// First existing configuration file in the default directories
pub fn find_default_config_path() -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = DEFAULT_CONFIG_DIRS
        .iter()
        .filter_map(|dir| expand_home(dir))
        .collect();
    find_config_in(&dirs)
}

/// First of `dirs` × [`DEFAULT_CONFIG_FILES`] that is an existing file
pub fn find_config_in<P: AsRef<Path>>(dirs: &[P]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| {
            DEFAULT_CONFIG_FILES
                .iter()
                .map(move |file| dir.as_ref().join(file))
        })
        .find(|path| path.is_file())
}
