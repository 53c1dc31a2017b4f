//! Execution context for an [`Orm`](crate::db::Orm).
//!
//! A context carries an optional deadline and any number of cancellation tokens.
//! Every blocking operation issued through an Orm bound to the context
//! (dialing, pinging, queries, transaction control) races against both, and
//! fails with [`DbError::ContextEnded`] as soon as either fires.

use crate::error::{DbError, DbResult};
use futures_util::future::select_all;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const REASON_CANCELED: &str = "context canceled";
pub const REASON_DEADLINE: &str = "context deadline exceeded";

#[derive(Debug, Clone, Default)]
pub struct OrmContext {
    deadline: Option<Instant>,
    cancel: Vec<CancellationToken>,
}

impl OrmContext {
    /// A context that never ends.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that ends `timeout` from now (or earlier, if the
    /// current deadline is sooner).
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that ends at `deadline`. The earlier deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derive a context that also ends when `token` is cancelled. Tokens
    /// accumulate: cancelling any of them ends the context.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel.push(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The error an operation would fail with right now, if the context has ended.
    pub fn err(&self) -> Option<DbError> {
        if self.cancel.iter().any(|t| t.is_cancelled()) {
            return Some(DbError::context_ended(REASON_CANCELED));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(DbError::context_ended(REASON_DEADLINE));
        }
        None
    }

    /// Run `operation` unless the context ends first.
    pub async fn run<T, F>(&self, operation: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        if self.deadline.is_none() && self.cancel.is_empty() {
            return operation.await;
        }

        let cancelled = async {
            if self.cancel.is_empty() {
                std::future::pending::<()>().await;
            } else {
                select_all(self.cancel.iter().map(|t| Box::pin(t.cancelled()))).await;
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(DbError::context_ended(REASON_CANCELED)),
            _ = expired => Err(DbError::context_ended(REASON_DEADLINE)),
            result = operation => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_operation() {
        let ctx = OrmContext::background();
        let value = ctx.run(async { Ok::<_, DbError>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn test_deadline_aborts_pending_operation() {
        let ctx = OrmContext::background().with_timeout(Duration::from_millis(20));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, DbError>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_context_ended());
        assert!(err.to_string().contains(REASON_DEADLINE));
    }

    #[tokio::test]
    async fn test_cancellation_fails_fast() {
        let token = CancellationToken::new();
        let ctx = OrmContext::background().with_cancellation(token.clone());
        token.cancel();
        let err = ctx.run(async { Ok::<_, DbError>(()) }).await.unwrap_err();
        assert!(err.to_string().contains(REASON_CANCELED));
    }

    #[tokio::test]
    async fn test_cancel_during_operation() {
        let token = CancellationToken::new();
        let ctx = OrmContext::background().with_cancellation(token.clone());
        let handle = tokio::spawn(async move {
            ctx.run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, DbError>(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_context_ended());
    }

    #[tokio::test]
    async fn test_earlier_deadline_wins() {
        let near = Instant::now() + Duration::from_secs(1);
        let far = Instant::now() + Duration::from_secs(60);
        let ctx = OrmContext::background().with_deadline(near).with_deadline(far);
        assert_eq!(ctx.deadline(), Some(near));
    }

    #[tokio::test]
    async fn test_chained_tokens() {
        let parent = CancellationToken::new();
        let second = CancellationToken::new();
        let ctx = OrmContext::background()
            .with_cancellation(parent.clone())
            .with_cancellation(second);
        parent.cancel();
        assert!(ctx.err().is_some());
    }
}
