/// Errors that can occur while driving a stage pipeline.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The stage does not implement the requested capability.
    ///
    /// This indicates a mis-assembled pipeline, not bad data.
    #[error("{stage}: {operation} is not supported")]
    Unsupported {
        stage: &'static str,
        operation: &'static str,
    },

    /// The stage was given non-blocking input but only accepts blocking input.
    #[error("{stage}: only blocking input is supported")]
    BlockingInputOnly { stage: &'static str },

    /// No destination is routed for the named channel.
    #[error("no route for channel '{channel}'")]
    NoRoute { channel: String },

    /// A filter failed while processing its input.
    #[error("{stage}: {source}")]
    Filter {
        stage: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StageError {
    pub(crate) fn unsupported(stage: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { stage, operation }
    }
}

pub type Result<T> = std::result::Result<T, StageError>;
