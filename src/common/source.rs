use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Some literal source code, along with the path it came from (if any).
///
/// A `Source` is always wrapped in an `Rc` once it enters the pipeline, so
/// every `Span` that refers into it can cheaply share ownership without
/// copying the underlying text.
#[derive(Debug, PartialEq, Eq)]
pub struct Source {
    pub path: Option<PathBuf>,
    pub contents: String,
}

impl Source {
    /// Builds a `Source` from an in-memory string, e.g. a REPL line.
    pub fn source(contents: impl Into<String>) -> Source {
        Source { path: None, contents: contents.into() }
    }

    /// Reads a `Source` from a file on disk.
    pub fn path(path: impl AsRef<Path>) -> io::Result<Source> {
        let contents = fs::read_to_string(path.as_ref())?;
        Ok(Source { path: Some(path.as_ref().to_path_buf()), contents })
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(p) => write!(f, "{}", p.display()),
            None => write!(f, "<source>"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn source_from_str() {
        let source = Source::source("(+ 1 2)");
        assert_eq!(source.contents, "(+ 1 2)");
        assert!(source.path.is_none());
    }

    #[test]
    fn source_from_missing_file() {
        assert!(Source::path("/does/not/exist.lisb").is_err());
    }
}
