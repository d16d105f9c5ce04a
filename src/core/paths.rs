use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the plugin directory.
pub const PLUGINS_ROOT_ENV: &str = "BERTH_PLUGINS_ROOT";

/// Directory scanned for user-wide plugin manifests.
///
/// `BERTH_PLUGINS_ROOT` wins when set (with `~` and `$VAR` expansion),
/// otherwise `$HOME/.local/share/berth-plugins`.
pub fn plugins_root() -> Result<PathBuf> {
    if let Ok(raw) = env::var(PLUGINS_ROOT_ENV) {
        if !raw.trim().is_empty() {
            let expanded = shellexpand::full(&raw).map_err(|e| {
                Error::config_invalid_value(PLUGINS_ROOT_ENV, Some(raw.clone()), e.to_string())
            })?;
            return Ok(PathBuf::from(expanded.as_ref()));
        }
    }

    let home = env::var("HOME").map_err(|_| {
        Error::internal_unexpected("HOME environment variable not set".to_string())
    })?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("berth-plugins"))
}

/// Project-local plugin manifests.
pub fn project_plugins(root: &Path) -> PathBuf {
    root.join("plugins")
}

/// User configuration file of a project root.
pub fn config_file(root: &Path) -> PathBuf {
    root.join("config.json")
}

/// Rendered environment directory.
pub fn env_dir(root: &Path) -> PathBuf {
    root.join("env")
}

/// Persisted deployment state (current release and step markers).
pub fn deployment_state(root: &Path) -> PathBuf {
    env_dir(root).join("deployment.json")
}

/// Cluster job templates, one `<service>-job.json` per job service.
pub fn k8s_jobs(root: &Path) -> PathBuf {
    env_dir(root).join("k8s").join("jobs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_lives_under_env() {
        let root = Path::new("/srv/berth");
        assert_eq!(
            deployment_state(root),
            PathBuf::from("/srv/berth/env/deployment.json")
        );
        assert_eq!(k8s_jobs(root), PathBuf::from("/srv/berth/env/k8s/jobs"));
    }
}
