//! Companion note files.
//!
//! Notes are read eagerly during a scan. A note that cannot be read still
//! belongs to its group; the failure is kept as a typed error and rendered
//! as inline text.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoteError {
    #[error("{0}")]
    Unreadable(String),

    #[error("not valid UTF-8 text")]
    InvalidUtf8,
}

/// Decoded note text with its line statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteBody {
    pub text: String,
    pub line_count: usize,
    pub needs_collapse: bool,
}

impl NoteBody {
    /// Trim `raw` and count its lines against the collapse threshold.
    pub fn new(raw: &str, collapse_lines: usize) -> Self {
        let text = raw.trim().to_string();
        let line_count = text.split('\n').count();
        Self {
            needs_collapse: line_count > collapse_lines,
            text,
            line_count,
        }
    }

    /// The first `lines` lines, used as the collapsed preview.
    pub fn head(&self, lines: usize) -> String {
        self.text
            .split('\n')
            .take(lines)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub file_name: String,
    pub body: Result<NoteBody, NoteError>,
}

impl Note {
    pub fn read(path: &Path, file_name: &str, collapse_lines: usize) -> Self {
        let body = match std::fs::read(path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(raw) => Ok(NoteBody::new(&raw, collapse_lines)),
                Err(_) => Err(NoteError::InvalidUtf8),
            },
            Err(e) => Err(NoteError::Unreadable(e.to_string())),
        };

        if let Err(ref e) = body {
            tracing::warn!("Could not read note {:?}: {}", path, e);
        }

        Self {
            file_name: file_name.to_string(),
            body,
        }
    }

    /// Text shown to the user; read failures become an inline message.
    pub fn display_text(&self) -> String {
        match &self.body {
            Ok(body) => body.text.clone(),
            Err(e) => format!("[read failed] {}", e),
        }
    }

    pub fn line_count(&self) -> usize {
        match &self.body {
            Ok(body) => body.line_count,
            Err(_) => 1,
        }
    }

    pub fn needs_collapse(&self) -> bool {
        matches!(&self.body, Ok(body) if body.needs_collapse)
    }

    pub fn is_error(&self) -> bool {
        self.body.is_err()
    }
}
