use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read log file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
