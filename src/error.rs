use thiserror::Error;

/// Image fetch or decode failure. Shown to the user as "no screenshot".
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to fetch {source_name}: {message}")]
    Fetch { source_name: String, message: String },
    #[error("fetching {source_name} returned HTTP {status}")]
    Status { source_name: String, status: u16 },
    #[error("failed to read {source_name}: {error}")]
    Read {
        source_name: String,
        #[source]
        error: std::io::Error,
    },
    #[error("{source_name} is not a decodable image: {error}")]
    Decode {
        source_name: String,
        #[source]
        error: image::ImageError,
    },
}

/// Upload failure. `Network` is transient and goes to the pending queue,
/// `Storage` is a permanent rejection by the remote store.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("network error: {0}")]
    Network(String),
    #[error("storage rejected object (HTTP {status}): {message}")]
    Storage { status: u16, message: String },
}

impl UploadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Network(_))
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("surface is empty ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("encoder failed: {0}")]
    Encoder(#[from] image::ImageError),
}

/// Why a composite could not be published. Transient upload failures never
/// show up here; they end up in the pending queue instead.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Local persisted state (check-ins, blob cache, pending queue).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },
    #[error("{path}: malformed JSON: {error}")]
    Json {
        path: String,
        #[source]
        error: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, error: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            error,
        }
    }

    /// The file simply is not there (as opposed to being unreadable).
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Io { error, .. } if error.kind() == std::io::ErrorKind::NotFound)
    }

    pub(crate) fn json(path: &std::path::Path, error: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.display().to_string(),
            error,
        }
    }
}
