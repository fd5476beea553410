/// Errors surfaced by the tap/target plugin model, the catalog algebra, and the
/// pipeline runner. Mirrors the taxonomy in the design doc: installation, decode,
/// pipeline (exit-code) and IO failures each get their own variant so callers can
/// match on the kind of failure rather than parse a message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to install {executable}: {stderr}")]
    InstallError { executable: String, stderr: String },

    #[error("failed to decode output of {executable}: {message}")]
    DecodeError { executable: String, message: String },

    #[error("{0}")]
    PipelineError(String),

    #[error("missing process io pipe for {0}")]
    MissingIoPipe(&'static str),

    #[error("io error: {source:?}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("json error: {source:?}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("background task join error: {source:?}")]
    TaskJoin {
        #[from]
        source: tokio::task::JoinError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
