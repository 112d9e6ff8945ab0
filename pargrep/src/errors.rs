use std::path::{Path, PathBuf};

pub type GrepResult<T> = std::result::Result<T, GrepError>;

#[derive(Debug, thiserror::Error)]
pub enum GrepError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("pattern error: {0}")]
    Pattern(String),

    /// I/O failure tied to one file or directory. Never aborts a run.
    #[error("{}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine error: {0}")]
    Engine(String),
}

impl GrepError {
    pub fn config(msg: impl Into<String>) -> Self {
        GrepError::Config(msg.into())
    }

    pub fn pattern(msg: impl Into<String>) -> Self {
        GrepError::Pattern(msg.into())
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        GrepError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        GrepError::Engine(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_prefixes_path() {
        let err = GrepError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().starts_with("/tmp/x: "));
    }

    #[test]
    fn test_config_error_display() {
        let err = GrepError::config("bad flag");
        assert_eq!(err.to_string(), "configuration error: bad flag");
    }
}
