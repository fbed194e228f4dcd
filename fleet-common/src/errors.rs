use std::fmt;
use thiserror::Error;

/// Error taxonomy shared by the reconciler, the factory and the rotator.
///
/// Errors scoped to one instance (`ConsoleFetch`, `Create`, `Delete`) never
/// abort sibling work; they are accumulated into an [`ErrorList`].
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("server listing error: {0:#}")]
    List(#[source] anyhow::Error),

    #[error("console output fetch failed for {instance_id}: {source:#}")]
    ConsoleFetch {
        instance_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("instance creation failed: {0:#}")]
    Create(#[source] anyhow::Error),

    #[error("instance deletion failed for {instance_id}: {source:#}")]
    Delete {
        instance_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to get server {instance_id}: {source:#}")]
    Get {
        instance_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to get image {image_ref}: {source:#}")]
    Image {
        image_ref: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("instance status is not active: {status}")]
    NotReady { instance_id: String, status: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0:#}")]
    Auth(#[source] anyhow::Error),

    #[error("{0}")]
    Multiple(ErrorList),
}

pub type FleetResult<T> = Result<T, FleetError>;

/// Accumulates per-instance failures of one batch or cycle.
///
/// Displays one error per line, in the order they were pushed.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<FleetError>);

impl ErrorList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: FleetError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FleetError> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<FleetError> {
        self.0
    }

    /// `Ok(())` when nothing was recorded, `FleetError::Multiple` otherwise.
    pub fn into_result(self) -> FleetResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(FleetError::Multiple(self))
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl FleetError {
    /// Per-instance errors carried by this error, flattening `Multiple`.
    pub fn flatten(&self) -> Vec<&FleetError> {
        match self {
            FleetError::Multiple(list) => list.iter().flat_map(|e| e.flatten()).collect(),
            other => vec![other],
        }
    }
}
