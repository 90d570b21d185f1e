//! Shared fixtures: a located counter actor and a two-process cluster.

#![allow(dead_code)]

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use locus::actor::{SnapshotReader, SnapshotWriter, Transferable};
use locus::location::LocationService;
use locus::{
    Actor, Address, Fiber, FiberConfig, FiberId, Handler, HandlerError, HandlerRegistry,
    JsonCodec, LocalNetwork, LocationType, Message, MessageCodec, Process, ProcessId,
    TransferError, TurnContext,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Increment(pub u32);

impl Message for Increment {
    const KIND: u16 = 1;
    type Response = u32;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetCount;

impl Message for GetCount {
    const KIND: u16 = 2;
    type Response = u32;
}

/// Holds the turn for the given number of milliseconds.
#[derive(Debug, Serialize, Deserialize)]
pub struct Stall(pub u64);

impl Message for Stall {
    const KIND: u16 = 3;
    type Response = ();
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Fail;

impl Message for Fail {
    const KIND: u16 = 4;
    type Response = ();
}

/// Ask the unit to relocate itself to the given fiber.
#[derive(Debug, Serialize, Deserialize)]
pub struct MoveTo(pub Address);

impl Message for MoveTo {
    const KIND: u16 = 5;
    type Response = ();
}

/// Never registered by any actor.
#[derive(Debug, Serialize, Deserialize)]
pub struct Unhandled;

impl Message for Unhandled {
    const KIND: u16 = 99;
    type Response = ();
}

#[derive(Debug, Serialize, Deserialize)]
struct Count(u32);

impl Transferable for Count {
    const NAME: &'static str = "count";
}

pub struct Unit {
    id: u64,
    count: u32,
}

impl Unit {
    pub fn new(id: u64) -> Self {
        Self { id, count: 0 }
    }
}

impl Actor for Unit {
    const KIND: &'static str = "unit";

    fn register_handlers<C: MessageCodec>(registry: &mut HandlerRegistry<Self, C>) {
        registry
            .register::<Increment>()
            .register::<GetCount>()
            .register::<Stall>()
            .register::<Fail>()
            .register::<MoveTo>();
    }

    fn location(&self) -> Option<(LocationType, u64)> {
        Some((LocationType::Unit, self.id))
    }

    fn snapshot<C: MessageCodec>(
        &self,
        out: &mut SnapshotWriter<'_, C>,
    ) -> Result<(), TransferError> {
        out.put(&Count(self.count))
    }

    fn restore<C: MessageCodec>(snapshot: &SnapshotReader<'_, C>) -> Result<Self, TransferError> {
        let (_, id) = snapshot.location();
        let Count(count) = snapshot.get()?;
        Ok(Self { id, count })
    }
}

#[async_trait::async_trait(?Send)]
impl Handler<Increment> for Unit {
    async fn handle<C: MessageCodec>(
        &mut self,
        message: Increment,
        _ctx: &TurnContext<C>,
    ) -> Result<u32, HandlerError> {
        self.count += message.0;
        Ok(self.count)
    }
}

#[async_trait::async_trait(?Send)]
impl Handler<GetCount> for Unit {
    async fn handle<C: MessageCodec>(
        &mut self,
        _message: GetCount,
        _ctx: &TurnContext<C>,
    ) -> Result<u32, HandlerError> {
        Ok(self.count)
    }
}

#[async_trait::async_trait(?Send)]
impl Handler<Stall> for Unit {
    async fn handle<C: MessageCodec>(
        &mut self,
        message: Stall,
        _ctx: &TurnContext<C>,
    ) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_millis(message.0)).await;
        Ok(())
    }
}

#[async_trait::async_trait(?Send)]
impl Handler<Fail> for Unit {
    async fn handle<C: MessageCodec>(
        &mut self,
        _message: Fail,
        _ctx: &TurnContext<C>,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::Failed("boom".to_string()))
    }
}

#[async_trait::async_trait(?Send)]
impl Handler<MoveTo> for Unit {
    async fn handle<C: MessageCodec>(
        &mut self,
        message: MoveTo,
        ctx: &TurnContext<C>,
    ) -> Result<(), HandlerError> {
        ctx.transfer_after_turn(message.0)
            .map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

/// Process 1 fiber 0 hosts the location tables; process 2 fiber 0 uses
/// them through a proxy. Both can restore units.
pub struct Cluster {
    pub network: Arc<LocalNetwork>,
    pub p1: Process,
    pub p2: Process,
    pub a: Rc<Fiber>,
    pub b: Rc<Fiber>,
    pub service: Rc<LocationService>,
}

/// Must be called from within a `LocalSet`.
pub fn cluster(config: FiberConfig) -> Cluster {
    let network = LocalNetwork::new();
    let p1 = Process::new(ProcessId(1), network.clone());
    let p2 = Process::new(ProcessId(2), network.clone());
    network.attach(&p1);
    network.attach(&p2);

    let a = Fiber::start(&p1, FiberId(0), JsonCodec, config.clone()).expect("fiber a");
    let b = Fiber::start(&p2, FiberId(0), JsonCodec, config).expect("fiber b");
    let service = a.host_location();
    b.connect_location(a.address());
    a.register::<Unit>();
    b.register::<Unit>();

    Cluster {
        network,
        p1,
        p2,
        a,
        b,
        service,
    }
}

/// Spawn unit `id` on `fiber` and register it in the location tables.
pub async fn spawn_located(fiber: &Rc<Fiber>, id: u64) -> Address {
    let address = fiber.spawn(Unit::new(id)).expect("spawn");
    fiber
        .location()
        .expect("location client")
        .add(LocationType::Unit, id, address)
        .await
        .expect("location add");
    address
}
