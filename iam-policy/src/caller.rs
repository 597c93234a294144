use crate::models::{Caller, RequestContext};
use async_trait::async_trait;
use logger_redacted::{LoggerConfig, MemberRedactor};
use std::error::Error;
use tracing::error;

/// Resolves the member identities of a request's principal
#[async_trait]
pub trait CallerResolver: Send + Sync {
    async fn resolve_caller(&self, ctx: &RequestContext) -> anyhow::Result<Caller>;
}

/// Diagnostics hook for failures the service handles internally.
///
/// Observers are only told about errors; they cannot change the outcome of
/// the call that produced them.
pub trait ErrorObserver: Send + Sync {
    fn observe(&self, ctx: &RequestContext, error: &(dyn Error + 'static));
}

/// Logs observed errors through `tracing` with member identities redacted
#[derive(Default)]
pub struct TracingErrorObserver {
    redactor: MemberRedactor,
}

impl TracingErrorObserver {
    pub fn new(redactor: MemberRedactor) -> Self {
        Self { redactor }
    }

    pub fn from_logger_config(config: &LoggerConfig) -> Self {
        Self::new(MemberRedactor::from_logger_config(config))
    }
}

impl ErrorObserver for TracingErrorObserver {
    fn observe(&self, ctx: &RequestContext, error: &(dyn Error + 'static)) {
        error!(
            request_id = %ctx.request_id,
            error = %self.redactor.redact(&error.to_string()),
            "IAM policy service error"
        );
    }
}
