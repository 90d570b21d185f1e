//! Explicit kind → handler dispatch table.
//!
//! Each actor type builds one [`HandlerRegistry`] the first time it is
//! spawned or registered on a fiber. The registry maps a message kind to a
//! type-erased closure that decodes the payload, calls the matching
//! [`Handler`] implementation and encodes the reply.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::codec::MessageCodec;
use crate::error::HandlerError;

use super::{Actor, Handler, Message, TurnContext};

/// Type-erased handler closure.
///
/// Takes the actor, the raw payload and the turn context, and returns a
/// future yielding the encoded reply.
type HandlerFn<A, C> = Box<
    dyn for<'a> Fn(
        &'a mut A,
        &'a [u8],
        &'a TurnContext<C>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, HandlerError>> + 'a>>,
>;

/// Kind → handler table of one actor type.
pub struct HandlerRegistry<A: Actor, C: MessageCodec> {
    handlers: HashMap<u16, HandlerFn<A, C>>,
}

impl<A: Actor, C: MessageCodec> Default for HandlerRegistry<A, C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<A: Actor, C: MessageCodec> fmt::Debug for HandlerRegistry<A, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("actor", &A::KIND)
            .field("kinds", &kinds)
            .finish()
    }
}

impl<A: Actor, C: MessageCodec> HandlerRegistry<A, C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry declared by `A`.
    pub(crate) fn for_actor() -> Self {
        let mut registry = Self::new();
        A::register_handlers(&mut registry);
        tracing::debug!(actor = A::KIND, handlers = registry.len(), "handler registry built");
        registry
    }

    /// Route messages of type `M` to `A`'s [`Handler<M>`] implementation.
    ///
    /// Registering the same kind twice keeps the last handler.
    pub fn register<M>(&mut self) -> &mut Self
    where
        M: Message,
        A: Handler<M>,
    {
        let handler: HandlerFn<A, C> =
            Box::new(|actor: &mut A, payload: &[u8], ctx: &TurnContext<C>| {
                Box::pin(async move {
                    let message: M = ctx.codec().decode(payload)?;
                    let response = <A as Handler<M>>::handle(actor, message, ctx).await?;
                    Ok(ctx.codec().encode(&response)?)
                })
            });

        if self.handlers.insert(M::KIND, handler).is_some() {
            tracing::warn!(actor = A::KIND, kind = M::KIND, "handler registered twice");
        }
        self
    }

    /// Whether a handler exists for `kind`.
    pub fn contains(&self, kind: u16) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no kind is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for `kind`.
    pub(crate) async fn dispatch(
        &self,
        actor: &mut A,
        kind: u16,
        payload: &[u8],
        ctx: &TurnContext<C>,
    ) -> Result<Vec<u8>, HandlerError> {
        match self.handlers.get(&kind) {
            Some(handler) => handler(actor, payload, ctx).await,
            None => Err(HandlerError::UnknownKind(kind)),
        }
    }
}
