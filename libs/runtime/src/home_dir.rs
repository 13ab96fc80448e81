//! Resolution of the server home directory (log files, relative paths).

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("cannot determine the user's home directory")]
    NoHome,
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Expand a leading `~` against the platform home directory.
pub fn expand_tilde(raw: &str) -> Result<PathBuf, HomeDirError> {
    if raw == "~" {
        return dirs::home_dir().ok_or(HomeDirError::NoHome);
    }
    match raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        Some(rest) => Ok(dirs::home_dir().ok_or(HomeDirError::NoHome)?.join(rest)),
        None => Ok(PathBuf::from(raw)),
    }
}

/// Resolve `configured` (or `<home>/<default_subdir>` when absent) into an
/// absolute path, optionally creating it.
pub fn resolve_home_dir(
    configured: Option<&str>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => expand_tilde(raw)?,
        None => dirs::home_dir()
            .ok_or(HomeDirError::NoHome)?
            .join(default_subdir),
    };
    let path = absolutize(&path);

    if create {
        std::fs::create_dir_all(&path).map_err(|source| HomeDirError::Create {
            path: path.clone(),
            source,
        })?;
    }
    Ok(path)
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_dir_is_created() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().join("nested").join("home");
        let resolved =
            resolve_home_dir(Some(target.to_str().unwrap()), ".vulndash", true).unwrap();
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }

    #[test]
    fn blank_value_falls_back_to_default_subdir() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let resolved = resolve_home_dir(Some("  "), ".vulndash", false).unwrap();
        assert_eq!(resolved, home.join(".vulndash"));
    }

    #[test]
    fn tilde_is_expanded() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_tilde("~/x/y").unwrap(), home.join("x/y"));
        assert_eq!(expand_tilde("/abs/p").unwrap(), PathBuf::from("/abs/p"));
    }

    #[test]
    fn relative_paths_become_absolute() {
        let resolved = resolve_home_dir(Some("rel/home"), ".vulndash", false).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("rel/home"));
    }
}
