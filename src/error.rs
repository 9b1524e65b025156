use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BagitifyError {
    #[error("invalid tabledap url: {0}")]
    #[diagnostic(help("expected something like https://host/erddap/tabledap/<dataset_id>"))]
    InvalidUrl(String),

    #[error("invalid timestamp: {0}")]
    #[diagnostic(help("use YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ"))]
    InvalidTimestamp(String),

    #[error("ERDDAP request failed: {0}")]
    RemoteHttp(String),

    #[error("ERDDAP returned status {status} for {url}: {message}")]
    RemoteStatus {
        status: u16,
        url: String,
        message: String,
    },

    #[error("unexpected ERDDAP response: {0}")]
    UnexpectedResponse(String),

    #[error(
        "temporary directory {} must be on the same filesystem as the bag directory {}",
        staging.display(),
        archive.display()
    )]
    #[diagnostic(help("pass --tmp-parent with a directory on the bag's filesystem"))]
    DifferentFilesystems { staging: PathBuf, archive: PathBuf },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("dataset metadata is missing attribute {0}")]
    MissingAttribute(String),
}

impl BagitifyError {
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            BagitifyError::RemoteHttp(_)
                | BagitifyError::RemoteStatus { .. }
                | BagitifyError::UnexpectedResponse(_)
        )
    }
}
