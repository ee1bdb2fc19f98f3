//! Config command handler

use quillsync_core::SyncConfig;

/// Print the effective configuration as TOML.
/// Returns true on success, false on error
pub fn handle_config(config: &SyncConfig) -> bool {
    match config.to_toml_string() {
        Ok(text) => {
            print!("{}", text);
            true
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}
