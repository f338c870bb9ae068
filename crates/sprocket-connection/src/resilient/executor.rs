//! Retry loop around procedure calls

use std::sync::Arc;

use sprocket_core::{Result, SprocketError, Value};
use tokio_util::sync::CancellationToken;

use super::{BackoffStrategy, RetryPolicy};
use crate::command::{ProcedureCommand, ProcedureReader};
use crate::connection::DbConnection;
use crate::failure::{FailureDecision, PassThrough};

/// Runs a procedure call up to `max_attempts` times.
///
/// Each attempt clones the template connection (persistent defaults kept,
/// no transaction), builds the command with the caller's `build` closure
/// and executes it. Failures the [`RetryPolicy`] accepts are retried after
/// the backoff delay; once the budget is spent the last failure is returned
/// inside [`SprocketError::RetriesExhausted`].
///
/// Attempts never consult the template's failure handler; it sees only the
/// final failure, so each call is reported once.
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    max_attempts: u32,
    backoff: BackoffStrategy,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ResilientExecutor {
    /// `max_attempts` counts the first try; values below 1 are raised to 1.
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stop retrying once `token` is cancelled.
    ///
    /// The token is checked before every attempt and interrupts backoff
    /// sleeps; an attempt already in flight runs to completion.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run a procedure for its row count; `inspect` sees the executed
    /// command of the successful attempt (output parameters, return value).
    #[tracing::instrument(skip(self, template, build, inspect), fields(db_code = %template.db_code()))]
    pub async fn execute_non_query<B, I>(
        &self,
        template: &DbConnection,
        schema: &str,
        procedure: &str,
        build: B,
        inspect: I,
    ) -> Result<i64>
    where
        B: FnMut(&mut ProcedureCommand<'_>),
        I: FnMut(&ProcedureCommand<'_>),
    {
        let outcome = self
            .retry_non_query(template, schema, procedure, build, inspect)
            .await;
        settle(template, outcome, -1)
    }

    /// Run a procedure for its first column of the first row.
    #[tracing::instrument(skip(self, template, build), fields(db_code = %template.db_code()))]
    pub async fn execute_scalar<B>(
        &self,
        template: &DbConnection,
        schema: &str,
        procedure: &str,
        build: B,
    ) -> Result<Value>
    where
        B: FnMut(&mut ProcedureCommand<'_>),
    {
        let outcome = self.retry_scalar(template, schema, procedure, build).await;
        settle(template, outcome, Value::Null)
    }

    /// Run a procedure and hand its rows to `read`.
    ///
    /// `read` runs again on every retried attempt, so it should discard
    /// whatever a failed attempt accumulated.
    #[tracing::instrument(skip(self, template, build, read), fields(db_code = %template.db_code()))]
    pub async fn execute_reader<B, R>(
        &self,
        template: &DbConnection,
        schema: &str,
        procedure: &str,
        build: B,
        read: R,
    ) -> Result<()>
    where
        B: FnMut(&mut ProcedureCommand<'_>),
        R: FnMut(&mut ProcedureReader<'_>) -> Result<()>,
    {
        let outcome = self
            .retry_reader(template, schema, procedure, build, read)
            .await;
        settle(template, outcome, ())
    }

    async fn retry_non_query<B, I>(
        &self,
        template: &DbConnection,
        schema: &str,
        procedure: &str,
        mut build: B,
        mut inspect: I,
    ) -> Result<i64>
    where
        B: FnMut(&mut ProcedureCommand<'_>),
        I: FnMut(&ProcedureCommand<'_>),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.check_cancelled()?;

            let mut connection = attempt_connection(template);
            let outcome = {
                let mut command = connection.stored_procedure_in(schema, procedure);
                build(&mut command);
                let outcome = command.execute_non_query().await;
                if outcome.is_ok() {
                    inspect(&command);
                }
                outcome
            };

            match outcome {
                Ok(rows) => return Ok(rows),
                Err(err) => self.after_failure(attempt, procedure, err).await?,
            }
        }
    }

    async fn retry_scalar<B>(
        &self,
        template: &DbConnection,
        schema: &str,
        procedure: &str,
        mut build: B,
    ) -> Result<Value>
    where
        B: FnMut(&mut ProcedureCommand<'_>),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.check_cancelled()?;

            let mut connection = attempt_connection(template);
            let outcome = {
                let mut command = connection.stored_procedure_in(schema, procedure);
                build(&mut command);
                command.execute_scalar().await
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => self.after_failure(attempt, procedure, err).await?,
            }
        }
    }

    async fn retry_reader<B, R>(
        &self,
        template: &DbConnection,
        schema: &str,
        procedure: &str,
        mut build: B,
        mut read: R,
    ) -> Result<()>
    where
        B: FnMut(&mut ProcedureCommand<'_>),
        R: FnMut(&mut ProcedureReader<'_>) -> Result<()>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.check_cancelled()?;

            let mut connection = attempt_connection(template);
            let outcome = {
                let mut command = connection.stored_procedure_in(schema, procedure);
                build(&mut command);
                command.execute_reader(&mut read).await
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(err) => self.after_failure(attempt, procedure, err).await?,
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SprocketError::Cancelled);
        }
        Ok(())
    }

    /// Decide whether attempt `attempt` may be followed by another one,
    /// sleeping through the backoff delay if so.
    async fn after_failure(&self, attempt: u32, procedure: &str, err: SprocketError) -> Result<()> {
        if !self.policy.should_retry(&err) {
            return Err(err);
        }
        if attempt >= self.max_attempts {
            return Err(SprocketError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }
        tracing::warn!(
            procedure,
            attempt,
            max_attempts = self.max_attempts,
            error = %err,
            "resilient call failed, retrying"
        );

        let delay = self.backoff.calculate_delay(attempt - 1);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SprocketError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Connection for one attempt; its failures are left to [`settle`].
fn attempt_connection(template: &DbConnection) -> DbConnection {
    template
        .clone_connection()
        .with_failure_handler(Arc::new(PassThrough))
}

/// Hand the final failure to the template's handler; cancellation is
/// returned as is.
fn settle<T>(template: &DbConnection, outcome: Result<T>, neutral: T) -> Result<T> {
    match outcome {
        Err(err) if !matches!(err, SprocketError::Cancelled) => {
            match template.failure_handler().on_failure(&err) {
                FailureDecision::Propagate => Err(err),
                FailureDecision::Swallow => Ok(neutral),
            }
        }
        other => other,
    }
}

impl Default for ResilientExecutor {
    /// Three attempts, 100ms apart, transient failures only
    fn default() -> Self {
        Self::new(3, BackoffStrategy::default())
    }
}
