//! A single-threaded execution context and the services it owns.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::actor::{
    Actor, ActorCell, ErasedActor, HandlerRegistry, Message, Restorer, TransferSnapshot,
    TypedRestorer,
};
use crate::address::{Address, EntityId, FiberId, ProcessId};
use crate::codec::{JsonCodec, MessageCodec};
use crate::config::FiberConfig;
use crate::error::{FiberError, HandlerError, MessagingError, TransferError};
use crate::location::{self, LocationClient, LocationProxy, LocationService};
use crate::mailbox::Mailbox;
use crate::messaging::{kinds, Direction, Envelope, MessageRouter};
use crate::sync::AsyncMutex;

use super::process::{FiberInbox, Inbound, Process};

/// Future returned by a [`SystemHandler`].
pub type SystemFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, HandlerError>>>>;

/// Handler for root-addressed messages of one kind.
///
/// Receives the fiber and the request payload; returns the encoded reply.
/// System requests run concurrently with each other and with actor turns.
pub type SystemHandler<C> = Rc<dyn Fn(Rc<Fiber<C>>, Vec<u8>) -> SystemFuture>;

struct ActorSlot<C: MessageCodec> {
    actor: Rc<dyn ErasedActor<C>>,
    mailbox: Mailbox,
}

/// A fiber: the unit of single-threaded execution.
///
/// Owns the per-fiber services (lock table, router, actors, optional
/// location tables) that would otherwise be process-wide singletons. All of
/// them are `!Send` and touched only from the fiber's `LocalSet`.
///
/// # Example
///
/// ```rust,ignore
/// let local = LocalSet::new();
/// local.run_until(async {
///     let fiber = Fiber::start(&process, FiberId(0), JsonCodec, FiberConfig::default())?;
///     fiber.host_location();
///     let unit = fiber.spawn(Unit::new(42))?;
///     fiber.location().unwrap().add(LocationType::Unit, 42, unit).await?;
/// }).await;
/// ```
pub struct Fiber<C: MessageCodec = JsonCodec> {
    id: FiberId,
    address: Address,
    process: Process,
    codec: C,
    config: FiberConfig,
    mutex: AsyncMutex,
    router: MessageRouter,
    next_entity: Cell<u32>,
    actors: RefCell<HashMap<EntityId, ActorSlot<C>>>,
    registries: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    restorers: RefCell<HashMap<&'static str, Rc<dyn Restorer<C>>>>,
    system: RefCell<HashMap<u16, SystemHandler<C>>>,
    location: RefCell<Option<Rc<dyn LocationClient>>>,
    shut_down: Cell<bool>,
    me: Weak<Fiber<C>>,
}

impl<C: MessageCodec> fmt::Debug for Fiber<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("address", &self.address)
            .field("actors", &self.actors.borrow().len())
            .field("pending_calls", &self.router.pending_count())
            .finish()
    }
}

impl<C: MessageCodec> Fiber<C> {
    /// Register fiber `id` with `process` and start its pump.
    ///
    /// Must be called from within a `LocalSet`. Process ids start at 1: the
    /// root of fiber 0 in process 0 would be [`Address::ZERO`].
    pub fn start(
        process: &Process,
        id: FiberId,
        codec: C,
        config: FiberConfig,
    ) -> Result<Rc<Self>, FiberError> {
        if process.id() == ProcessId(0) {
            tracing::error!(fiber = ?id, "process id 0 is reserved");
            return Err(FiberError::ReservedProcess(process.id()));
        }
        let address = Address::encode(process.id(), id, EntityId::ROOT)?;
        let inbox = process.create_fiber(id)?;

        let fiber = Rc::new_cyclic(|me| Self {
            id,
            address,
            process: process.clone(),
            codec,
            mutex: AsyncMutex::new(config.max_lock_level()),
            config,
            router: MessageRouter::new(process.clone()),
            next_entity: Cell::new(1),
            actors: RefCell::new(HashMap::new()),
            registries: RefCell::new(HashMap::new()),
            restorers: RefCell::new(HashMap::new()),
            system: RefCell::new(HashMap::new()),
            location: RefCell::new(None),
            shut_down: Cell::new(false),
            me: me.clone(),
        });

        fiber.register_system(
            kinds::TRANSFER_IN,
            Rc::new(|fiber: Rc<Fiber<C>>, payload: Vec<u8>| -> SystemFuture {
                Box::pin(async move { fiber.accept_transfer(&payload) })
            }),
        );

        tokio::task::spawn_local(pump(Rc::downgrade(&fiber), inbox));
        tracing::debug!(%address, "fiber started");
        Ok(fiber)
    }

    /// Fiber id.
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Root address (entity `0`) of this fiber.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Process the fiber belongs to.
    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Payload codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Runtime configuration.
    pub fn config(&self) -> &FiberConfig {
        &self.config
    }

    /// The fiber's lock table.
    pub fn mutex(&self) -> &AsyncMutex {
        &self.mutex
    }

    /// The fiber's router.
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Make actors of type `A` restorable on this fiber.
    ///
    /// [`spawn`](Self::spawn) does this implicitly; fibers that only
    /// receive transfers must register explicitly.
    pub fn register<A: Actor>(&self) {
        self.registry::<A>();
    }

    /// Start a new actor and return its address.
    pub fn spawn<A: Actor>(&self, actor: A) -> Result<Address, FiberError> {
        if self.shut_down.get() {
            return Err(FiberError::ShutDown(self.id));
        }

        let entity = self.next_entity.get();
        let next = entity
            .checked_add(1)
            .ok_or(FiberError::EntitiesExhausted(self.id))?;
        let address = Address::encode(self.process.id(), self.id, EntityId(entity))?;
        self.next_entity.set(next);

        let cell: Rc<ActorCell<A, C>> = Rc::new(ActorCell::new(
            actor,
            address,
            self.registry::<A>(),
            self.me.clone(),
        ));
        let mailbox = Mailbox::new(address, cell.clone());
        self.actors.borrow_mut().insert(
            EntityId(entity),
            ActorSlot {
                actor: cell,
                mailbox,
            },
        );

        tracing::debug!(%address, kind = A::KIND, "actor spawned");
        Ok(address)
    }

    /// Dispose the actor at `address`. Returns whether it existed.
    pub fn despawn(&self, address: Address) -> bool {
        if address.fiber_root() != self.address {
            return false;
        }
        let slot = self.actors.borrow_mut().remove(&address.entity());
        match slot {
            Some(slot) => {
                for envelope in slot.mailbox.dispose() {
                    self.router.bounce(&envelope);
                }
                tracing::debug!(%address, kind = slot.actor.kind(), "actor disposed");
                true
            }
            None => false,
        }
    }

    /// Whether a live actor sits at `address`.
    pub fn contains(&self, address: Address) -> bool {
        address.fiber_root() == self.address
            && self.actors.borrow().contains_key(&address.entity())
    }

    /// Number of live actors.
    pub fn actor_count(&self) -> usize {
        self.actors.borrow().len()
    }

    /// Mailbox of the actor at `address`.
    pub fn mailbox(&self, address: Address) -> Option<Mailbox> {
        if address.fiber_root() != self.address {
            return None;
        }
        self.actors
            .borrow()
            .get(&address.entity())
            .map(|slot| slot.mailbox.clone())
    }

    pub(crate) fn actor(&self, address: Address) -> Option<(Rc<dyn ErasedActor<C>>, Mailbox)> {
        if address.fiber_root() != self.address {
            return None;
        }
        self.actors
            .borrow()
            .get(&address.entity())
            .map(|slot| (slot.actor.clone(), slot.mailbox.clone()))
    }

    /// Install a handler for root-addressed messages of `kind`.
    pub fn register_system(&self, kind: u16, handler: SystemHandler<C>) {
        if self.system.borrow_mut().insert(kind, handler).is_some() {
            tracing::warn!(fiber = %self.address, kind, "system handler replaced");
        }
    }

    /// Host the location tables on this fiber and serve them to others.
    ///
    /// Becomes this fiber's location client.
    pub fn host_location(&self) -> Rc<LocationService> {
        let service = LocationService::new(self.mutex.clone(), &self.config);
        self.register_system(kinds::LOCATION, location::serve(service.clone()));
        self.set_location(service.clone());
        tracing::debug!(fiber = %self.address, "hosting location service");
        service
    }

    /// Use the location service hosted on the fiber rooted at `host`.
    pub fn connect_location(&self, host: Address) {
        self.set_location(Rc::new(LocationProxy::new(self.me.clone(), host)));
    }

    /// Set the location client used by transfers and location-addressed sends.
    pub fn set_location(&self, client: Rc<dyn LocationClient>) {
        *self.location.borrow_mut() = Some(client);
    }

    /// The configured location client.
    pub fn location(&self) -> Option<Rc<dyn LocationClient>> {
        self.location.borrow().clone()
    }

    /// Send a one-way message from `from`.
    pub fn send_from<M: Message>(
        &self,
        from: Address,
        to: Address,
        message: &M,
    ) -> Result<(), MessagingError> {
        let payload = self.codec.encode(message)?;
        self.router.send(from, to, M::KIND, payload)
    }

    /// Call `to` from `from` and decode the reply.
    pub async fn call_from<M: Message>(
        &self,
        from: Address,
        to: Address,
        message: &M,
        deadline: Duration,
    ) -> Result<M::Response, MessagingError> {
        let payload = self.codec.encode(message)?;
        let body = self.router.call(from, to, M::KIND, payload, deadline).await?;
        Ok(self.codec.decode(&body)?)
    }

    /// Send a one-way message from the fiber root.
    pub fn send<M: Message>(&self, to: Address, message: &M) -> Result<(), MessagingError> {
        self.send_from(self.address, to, message)
    }

    /// Call `to` from the fiber root with the configured call timeout.
    pub async fn call<M: Message>(
        &self,
        to: Address,
        message: &M,
    ) -> Result<M::Response, MessagingError> {
        self.call_from(self.address, to, message, self.config.call_timeout())
            .await
    }

    /// Stop the fiber: unregister it, dispose every actor and fail pending calls.
    ///
    /// Requests still queued for a disposed actor are answered with a redirect.
    pub fn shutdown(&self) {
        if self.shut_down.replace(true) {
            return;
        }
        self.process.destroy_fiber(self.id);
        let slots: Vec<_> = self.actors.borrow_mut().drain().collect();
        for (_, slot) in &slots {
            for envelope in slot.mailbox.dispose() {
                self.router.bounce(&envelope);
            }
        }
        self.router.close();
        tracing::debug!(fiber = %self.address, actors = slots.len(), "fiber shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.get()
    }

    fn registry<A: Actor>(&self) -> Rc<HandlerRegistry<A, C>> {
        let existing = self
            .registries
            .borrow()
            .get(&TypeId::of::<A>())
            .cloned()
            .and_then(|any| any.downcast::<HandlerRegistry<A, C>>().ok());
        if let Some(registry) = existing {
            return registry;
        }

        let registry = Rc::new(HandlerRegistry::<A, C>::for_actor());
        self.registries
            .borrow_mut()
            .insert(TypeId::of::<A>(), registry.clone());
        let previous = self
            .restorers
            .borrow_mut()
            .insert(A::KIND, Rc::new(TypedRestorer::<A>::new()));
        if previous.is_some() {
            tracing::warn!(kind = A::KIND, "two actor types share a kind name");
        }
        registry
    }

    fn accept_transfer(self: &Rc<Self>, payload: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let snapshot: TransferSnapshot = self.codec.decode(payload)?;
        let restorer = self
            .restorers
            .borrow()
            .get(snapshot.actor_kind.as_str())
            .cloned()
            .ok_or_else(|| TransferError::UnknownKind(snapshot.actor_kind.clone()))
            .map_err(|e| HandlerError::Failed(e.to_string()))?;

        let address = restorer
            .restore(self, &snapshot)
            .map_err(|e| HandlerError::Failed(e.to_string()))?;
        tracing::debug!(
            %address,
            kind = %snapshot.actor_kind,
            location_type = ?snapshot.location_type,
            id = snapshot.location_id,
            "actor restored from transfer"
        );
        Ok(self.codec.encode(&address)?)
    }

    fn dispatch(self: &Rc<Self>, envelope: Envelope) {
        match envelope.direction {
            Direction::Response | Direction::Fault | Direction::Redirect => {
                self.router.complete(envelope);
            }
            Direction::Request | Direction::OneWay if envelope.to.is_root() => {
                self.dispatch_system(envelope)
            }
            Direction::Request | Direction::OneWay => self.dispatch_actor(envelope),
        }
    }

    fn dispatch_system(self: &Rc<Self>, mut envelope: Envelope) {
        let handler = self.system.borrow().get(&envelope.kind).cloned();
        let Some(handler) = handler else {
            tracing::warn!(fiber = %self.address, kind = envelope.kind, "no system handler");
            let outcome = Err(HandlerError::UnknownKind(envelope.kind));
            self.router.reply(&envelope, &outcome);
            return;
        };

        let payload = std::mem::take(&mut envelope.payload);
        let fiber = self.clone();
        tokio::task::spawn_local(async move {
            let outcome = handler(fiber.clone(), payload).await;
            if let Err(error) = &outcome {
                tracing::debug!(fiber = %fiber.address, kind = envelope.kind, %error, "system request failed");
            }
            fiber.router.reply(&envelope, &outcome);
        });
    }

    fn dispatch_actor(&self, envelope: Envelope) {
        let mailbox = self
            .actors
            .borrow()
            .get(&envelope.to.entity())
            .map(|slot| slot.mailbox.clone());

        match mailbox {
            Some(mailbox) if mailbox.is_open() => {
                if mailbox.enqueue(envelope).is_err() {
                    tracing::warn!(fiber = %self.address, "mailbox closed during enqueue");
                }
            }
            _ => self.router.bounce(&envelope),
        }
    }
}

async fn pump<C: MessageCodec>(fiber: Weak<Fiber<C>>, mut inbox: FiberInbox) {
    while let Some(inbound) = inbox.recv().await {
        let Some(fiber) = fiber.upgrade() else {
            break;
        };
        match inbound {
            Inbound::Envelope(envelope) => fiber.dispatch(envelope),
            Inbound::Task(task) => task(),
        }
    }
    tracing::trace!("fiber pump stopped");
}
