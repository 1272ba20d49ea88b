use std::path::PathBuf;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Errors surfaced by the engine. Expected per-file failures (a corrupt
/// image, a file deleted mid-operation) are handled close to where they
/// occur; these are the ones callers can meaningfully act on.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// File kept changing (or stayed locked) past the stability deadline.
    #[error("file not ready: {0}")]
    FileNotReady(PathBuf),

    #[error("source file missing: {0}")]
    MissingSource(PathBuf),

    #[error("thumbnail generation failed for {path}")]
    Thumbnail {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no home directory available for default paths")]
    NoProjectDirs,

    #[error("filesystem watch error")]
    Watch(#[from] notify::Error),

    #[error("snapshot serialization error")]
    Snapshot(#[from] serde_json::Error),

    #[error("io error")]
    Io(#[from] std::io::Error),
}
