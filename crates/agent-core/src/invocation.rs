//! Cooperative cancellation shared between a facet caller and the worker
//! running plugin code.

use tokio_util::sync::CancellationToken;

/// Per-invocation cancellation handle.
///
/// A fresh context is created for every timed facet invocation and handed to
/// the plugin code being run. When the caller's bounded wait expires the
/// context is interrupted; the worker itself is never killed, so plugin code
/// that polls [`InvocationContext::is_interrupted`] (or selects against
/// [`InvocationContext::interrupted`]) can abort early, while ill-behaved
/// code simply finishes later and has its result discarded.
///
/// Dispatchers also hand their own context into proxy calls; a context that
/// is already interrupted at call entry makes the call fail fast without
/// dispatching any work.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    token: CancellationToken,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Flag this invocation as interrupted. Idempotent.
    pub fn interrupt(&self) {
        self.token.cancel();
    }

    /// True once [`InvocationContext::interrupt`] has been called.
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the invocation is interrupted. Long-running plugin
    /// code can select against this instead of polling.
    pub async fn interrupted(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_is_observable_and_idempotent() {
        let ctx = InvocationContext::new();
        assert!(!ctx.is_interrupted());

        ctx.interrupt();
        ctx.interrupt();
        assert!(ctx.is_interrupted());

        // already resolved, must not hang
        ctx.interrupted().await;
    }

    #[tokio::test]
    async fn clones_share_the_interruption_flag() {
        let ctx = InvocationContext::new();
        let observer = ctx.clone();

        ctx.interrupt();
        assert!(observer.is_interrupted());
    }
}
