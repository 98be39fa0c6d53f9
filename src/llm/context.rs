//! Ambient call context
//!
//! The gateway stamps every telemetry record with the session and agent
//! that made the call. Those tags live in a task-local, not a global:
//! setting them in one task never leaks into siblings, which matters when
//! articles analyze concurrently and the analysts fan out in parallel.

use std::future::Future;

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
}

tokio::task_local! {
    static CALL_CONTEXT: CallContext;
}

impl CallContext {
    /// Snapshot of the ambient context; empty outside any scope.
    pub fn current() -> CallContext {
        CALL_CONTEXT
            .try_with(|ctx| ctx.clone())
            .unwrap_or_default()
    }

    /// Run `fut` with the session tag set, preserving any agent tag from an
    /// enclosing scope.
    pub async fn with_session<F>(session_id: impl Into<String>, fut: F) -> F::Output
    where
        F: Future,
    {
        let mut ctx = Self::current();
        ctx.session_id = Some(session_id.into());
        CALL_CONTEXT.scope(ctx, fut).await
    }

    /// Run `fut` with the agent tag set, preserving any session tag from an
    /// enclosing scope.
    pub async fn with_agent<F>(agent_name: impl Into<String>, fut: F) -> F::Output
    where
        F: Future,
    {
        let mut ctx = Self::current();
        ctx.agent_name = Some(agent_name.into());
        CALL_CONTEXT.scope(ctx, fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nested_scopes_compose() {
        CallContext::with_session("s1", async {
            assert_eq!(CallContext::current().session_id.as_deref(), Some("s1"));
            assert!(CallContext::current().agent_name.is_none());

            CallContext::with_agent("Collector", async {
                let ctx = CallContext::current();
                assert_eq!(ctx.session_id.as_deref(), Some("s1"));
                assert_eq!(ctx.agent_name.as_deref(), Some("Collector"));
            })
            .await;

            // The agent tag does not survive its scope
            assert!(CallContext::current().agent_name.is_none());
        })
        .await;

        // Nothing survives outside all scopes
        let ctx = CallContext::current();
        assert!(ctx.session_id.is_none() && ctx.agent_name.is_none());
    }

    #[tokio::test]
    async fn test_sibling_tasks_do_not_leak() {
        let handle = tokio::spawn(CallContext::with_agent("A", async {
            tokio::task::yield_now().await;
            CallContext::current().agent_name
        }));
        // The spawning task sees no tag while the child runs
        assert!(CallContext::current().agent_name.is_none());
        assert_eq!(handle.await.unwrap().as_deref(), Some("A"));
    }
}
