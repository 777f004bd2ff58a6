//! Declared failures of the intelligence engine.
//!
//! Runtime data irregularities never surface here; they degrade to empty or
//! neutral results inside the analyzers. These variants cover caller mistakes
//! only.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntelError {
    /// An argument is outside its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A clustering strategy name that is not recognized.
    #[error("unknown clustering strategy: '{0}'. Use entity_based, topic_based, project_based, mixed_features, hierarchical, or adaptive")]
    UnknownStrategy(String),

    /// A similarity metric name that is not recognized.
    #[error("unknown similarity metric: '{0}'")]
    UnknownMetric(String),
}
