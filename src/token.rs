//! # Token Source
//!
//! Supplies the bearer token used to authenticate the telemetry socket.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of the current bearer token
#[cfg_attr(test, mockall::automock)]
pub trait TokenSource: Send + Sync {
    /// Current token, or `None` when the user is not signed in
    fn token(&self) -> Option<String>;
}

/// Fixed token, e.g. passed on the command line
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token persisted in a file by the sign-in flow
///
/// The file is re-read on every call so a refreshed token is picked up by the
/// next lazy reconnect.
#[derive(Debug, Clone)]
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenSource for FileTokenSource {
    fn token(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    None
                } else {
                    Some(token.to_string())
                }
            }
            Err(e) => {
                debug!("No token at {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_static_token() {
        assert_eq!(StaticToken::new("abc").token(), Some("abc".to_string()));
        assert_eq!(StaticToken::none().token(), None);
    }

    #[test]
    fn test_file_token_is_trimmed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  eyJhbGciOi.payload.sig  ").unwrap();

        let source = FileTokenSource::new(file.path());
        assert_eq!(source.token(), Some("eyJhbGciOi.payload.sig".to_string()));
    }

    #[test]
    fn test_empty_file_has_no_token() {
        let file = NamedTempFile::new().unwrap();
        assert_eq!(FileTokenSource::new(file.path()).token(), None);
    }

    #[test]
    fn test_missing_file_has_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileTokenSource::new(dir.path().join("token"));
        assert_eq!(source.token(), None);
    }

    #[test]
    fn test_file_token_source_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        assert_eq!(FileTokenSource::new(&path).path(), path.as_path());
    }

    #[test]
    fn test_file_is_reread_on_each_call() {
        let mut file = NamedTempFile::new().unwrap();
        let source = FileTokenSource::new(file.path());
        assert_eq!(source.token(), None);

        write!(file, "fresh").unwrap();
        file.flush().unwrap();
        assert_eq!(source.token(), Some("fresh".to_string()));
    }
}
