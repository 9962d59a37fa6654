use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("base path cannot be empty")]
    EmptyBase,
    #[error("target path cannot be empty")]
    EmptyTarget,
    #[error("failed to resolve current directory: {0}")]
    CurrentDir(String),
    #[error("path contains directory traversal sequence: {0}")]
    Traversal(String),
    #[error("path cannot be absolute: {0}")]
    Absolute(String),
    #[error("path traversal detected: target path {target:?} is outside base directory {base:?}")]
    OutsideBase { target: String, base: String },
}

/// Ensures `target` resolves inside `base` after `.`/`..` are collapsed.
pub fn validate_path(base: &Path, target: &Path) -> Result<(), PathError> {
    if base.as_os_str().is_empty() {
        return Err(PathError::EmptyBase);
    }
    if target.as_os_str().is_empty() {
        return Err(PathError::EmptyTarget);
    }

    let abs_base = absolutize(base)?;
    let abs_target = absolutize(target)?;
    if abs_target.starts_with(&abs_base) {
        Ok(())
    } else {
        Err(PathError::OutsideBase {
            target: target.display().to_string(),
            base: base.display().to_string(),
        })
    }
}

/// Validates a relative `name` to be created under `base`.
pub fn validate_output_path(base: &Path, name: &str) -> Result<(), PathError> {
    if base.as_os_str().is_empty() {
        return Err(PathError::EmptyBase);
    }
    if name.is_empty() {
        return Err(PathError::EmptyTarget);
    }
    if name.contains("..") {
        return Err(PathError::Traversal(name.to_string()));
    }
    if Path::new(name).is_absolute() {
        return Err(PathError::Absolute(name.to_string()));
    }
    validate_path(base, &base.join(name))
}

fn absolutize(path: &Path) -> Result<PathBuf, PathError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| PathError::CurrentDir(e.to_string()))?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_inside_base_are_accepted() {
        let base = Path::new("/srv/out");
        assert!(validate_path(base, Path::new("/srv/out")).is_ok());
        assert!(validate_path(base, Path::new("/srv/out/images/img-01.png")).is_ok());
        assert!(validate_path(base, Path::new("/srv/out/./a/../b")).is_ok());
    }

    #[test]
    fn escaping_targets_are_rejected() {
        let base = Path::new("/srv/out");
        for target in ["/srv/out/../etc", "/srv/outside", "/etc/passwd", "/srv/out/a/../../x"] {
            let err = validate_path(base, Path::new(target)).unwrap_err();
            assert!(matches!(err, PathError::OutsideBase { .. }), "{target}: {err}");
        }
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert_eq!(validate_path(Path::new(""), Path::new("x")), Err(PathError::EmptyBase));
        assert_eq!(validate_path(Path::new("x"), Path::new("")), Err(PathError::EmptyTarget));
        assert_eq!(validate_output_path(Path::new("."), ""), Err(PathError::EmptyTarget));
    }

    #[test]
    fn output_names_must_be_relative_and_local() {
        let base = Path::new(".");
        assert!(validate_output_path(base, "images").is_ok());
        assert!(validate_output_path(base, "out/screens").is_ok());
        assert!(matches!(validate_output_path(base, "../images"), Err(PathError::Traversal(_))));
        assert!(matches!(validate_output_path(base, "a/../../b"), Err(PathError::Traversal(_))));
        assert!(matches!(validate_output_path(base, "/tmp/images"), Err(PathError::Absolute(_))));
    }
}
