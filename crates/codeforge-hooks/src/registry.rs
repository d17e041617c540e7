use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use codeforge_utils::error::HookError;

use crate::context::{HookContext, HookEvent};

/// A registered interceptor.
///
/// Handlers receive the context by value and return the (possibly
/// modified) context. Returning an error does not abort the chain: the
/// registry logs it and continues with the last successfully produced
/// context.
#[async_trait]
pub trait Hook<T>: Send + Sync {
    /// Invoke the handler.
    ///
    /// # Errors
    ///
    /// Returns `HookError` on handler failure; the registry isolates it.
    async fn call(&self, ctx: HookContext<T>) -> Result<HookContext<T>, HookError>;
}

type BoxedHookFn<T> = Arc<
    dyn Fn(
            HookContext<T>,
        ) -> Pin<Box<dyn Future<Output = Result<HookContext<T>, HookError>> + Send>>
        + Send
        + Sync,
>;

/// Adapter turning an async closure into a [`Hook`].
pub struct FnHook<T> {
    f: BoxedHookFn<T>,
}

impl<T> FnHook<T> {
    /// Wrap an async closure as a hook.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HookContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookContext<T>, HookError>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Hook<T> for FnHook<T> {
    async fn call(&self, ctx: HookContext<T>) -> Result<HookContext<T>, HookError> {
        (self.f)(ctx).await
    }
}

/// Ordered, event-typed hook registry.
///
/// Handlers are kept sorted descending by priority; registration order is
/// preserved for equal priorities. `trigger` threads the context through
/// the chain with per-handler failure isolation.
pub struct HookRegistry<T> {
    hooks: HashMap<HookEvent, Vec<(i32, Arc<dyn Hook<T>>)>>,
}

impl<T> Default for HookRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HookRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hooks: HashMap::new(),
        }
    }

    /// Register a handler for an event with a priority.
    ///
    /// Higher priorities run earlier. The sort is performed at
    /// registration time and is stable with respect to insertion order
    /// for equal priorities.
    pub fn register(&mut self, event: HookEvent, priority: i32, hook: Arc<dyn Hook<T>>) {
        let chain = self.hooks.entry(event).or_default();
        chain.push((priority, hook));
        chain.sort_by_key(|(p, _)| std::cmp::Reverse(*p));
    }

    /// Register an async closure for an event.
    pub fn register_fn<F, Fut>(&mut self, event: HookEvent, priority: i32, f: F)
    where
        F: Fn(HookContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookContext<T>, HookError>> + Send + 'static,
        T: Send + 'static,
    {
        self.register(event, priority, Arc::new(FnHook::new(f)));
    }

    /// Remove all handlers for one event.
    pub fn clear(&mut self, event: HookEvent) {
        self.hooks.remove(&event);
    }

    /// Number of handlers registered for an event.
    #[must_use]
    pub fn len_for(&self, event: HookEvent) -> usize {
        self.hooks.get(&event).map_or(0, Vec::len)
    }

    /// Total number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    /// Whether no handlers are registered at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl<T: Clone + Send + 'static> HookRegistry<T> {
    /// Trigger all handlers registered for an event, in order.
    ///
    /// The context's `data` is threaded through the chain. An error from
    /// one handler is caught and logged and does not abort the chain;
    /// subsequent handlers run with the last successfully produced
    /// context. The final context is returned to the caller, which
    /// inspects `metadata` for decisions.
    pub async fn trigger(&self, event: HookEvent, mut ctx: HookContext<T>) -> HookContext<T> {
        ctx.event = event;

        let Some(chain) = self.hooks.get(&event) else {
            return ctx;
        };

        for (priority, hook) in chain {
            // Clone so the last good context survives a failing handler.
            let attempt = ctx.clone();
            match hook.call(attempt).await {
                Ok(next) => ctx = next,
                Err(e) => {
                    warn!(
                        event = %event,
                        priority = *priority,
                        error = %e,
                        "hook handler failed, continuing chain"
                    );
                }
            }
        }

        ctx
    }
}
