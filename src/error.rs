//! Error taxonomy surfaced by the workflow engine.

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("request carries no authenticated principal")]
    NotAuthenticated,
    #[error("actor '{0}' holds no role permitted for this operation")]
    NotAuthorized(String),
    #[error("no rule from status '{status}' for action {action} under role '{role}'")]
    TransitionNotPermitted {
        status: String,
        action: String,
        role: String,
    },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rule table misconfigured: {0}")]
    RuleConfiguration(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    System(String),
}

impl WorkflowError {
    /// Short machine-readable code carried alongside the human remark.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::NotAuthorized(_) => "not_authorized",
            Self::TransitionNotPermitted { .. } => "transition_not_permitted",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::NotFound(_) => "not_found",
            Self::RuleConfiguration(_) => "rule_configuration_error",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation_error",
            Self::System(_) => "system_error",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<sled::Error> for WorkflowError {
    fn from(err: sled::Error) -> Self {
        WorkflowError::System(err.to_string())
    }
}

impl From<minicbor::decode::Error> for WorkflowError {
    fn from(err: minicbor::decode::Error) -> Self {
        WorkflowError::System(format!("cbor decode: {err}"))
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for WorkflowError {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        WorkflowError::System(format!("cbor encode: {err}"))
    }
}
