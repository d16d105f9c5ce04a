//! Rendered environment on disk.
//!
//! Template rendering itself lives outside this tool. The renderer interface
//! exists so upgrade steps can request a re-render between releases.

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::paths;
use crate::utils::io;

pub trait EnvRenderer {
    /// Regenerate the environment under `<root>/env` from `config`.
    fn save(&self, root: &Path, config: &Config) -> Result<()>;
}

/// Writes the resolved configuration to `<root>/env/config.json`.
///
/// Stands in for a full template renderer: downstream tooling reads the
/// snapshot, and upgrade steps can verify a re-render happened.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotRenderer;

impl EnvRenderer for SnapshotRenderer {
    fn save(&self, root: &Path, config: &Config) -> Result<()> {
        let dir = paths::env_dir(root);
        fs::create_dir_all(&dir).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("create {}", dir.display())))
        })?;
        let content = serde_json::to_string_pretty(config)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize env".into())))?;
        io::write_file_atomic(&dir.join("config.json"), &content, "save env")?;
        log_status!("env", "Environment saved to {}", dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn snapshot_writes_config_under_env() {
        let dir = TempDir::new().unwrap();
        let config = Config::new().with("ID", "abc");
        SnapshotRenderer.save(dir.path(), &config).unwrap();

        let written = fs::read_to_string(dir.path().join("env").join("config.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["ID"], "abc");
    }
}
