//! Error taxonomy shared by the repositories and the attachment workflow.
use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Required field missing or invalid; raised before any write.
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("backend unavailable: {0:#}")]
    BackendUnavailable(#[source] anyhow::Error),
    #[error("image upload failed: {0:#}")]
    UploadFailure(#[source] anyhow::Error),
    #[error("{collection}/{id} not found")]
    NotFound { collection: &'static str, id: String },
    #[error("malformed document {collection}/{id}: {source}")]
    Decode {
        collection: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

/// Names every field that failed validation, so the form can be completed in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub fields: Vec<&'static str>,
}

impl ValidationError {
    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| *f == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "missing some field(s): {}; please make sure to fill everything out",
            self.fields.join(", ")
        )
    }
}

/// Accumulates failing fields; `finish` yields `Err` if any were recorded.
#[derive(Debug, Default)]
pub(crate) struct Checker {
    fields: Vec<&'static str>,
}

impl Checker {
    pub(crate) fn require_text(&mut self, field: &'static str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.fields.push(field);
        }
        self
    }

    pub(crate) fn require(&mut self, field: &'static str, ok: bool) -> &mut Self {
        if !ok {
            self.fields.push(field);
        }
        self
    }

    pub(crate) fn finish(&mut self) -> Result<(), ValidationError> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                fields: std::mem::take(&mut self.fields),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checker_collects_all_missing_fields() {
        let err = Checker::default()
            .require_text("title", "  ")
            .require_text("description", "ok")
            .require("category", false)
            .finish()
            .unwrap_err();
        assert_eq!(err.fields, vec!["title", "category"]);
        assert!(err.to_string().contains("title, category"));
    }

    #[test]
    fn checker_passes_when_complete() {
        assert!(Checker::default()
            .require_text("title", "Tower")
            .finish()
            .is_ok());
    }
}
