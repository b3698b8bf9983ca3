//! Tokio driver for a [`NodeContext`]: the role timer and the radio event queue.
//!
//! Radio stacks deliver callbacks on their own threads; they only push into the event
//! channel. One consumer task applies events to the context in arrival order.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::envelope::MessageId;
use crate::node::NodeContext;
use crate::platform::{PeerAddress, RadioEvent};
use crate::scheduler::Role;

pub type EventSender = mpsc::UnboundedSender<RadioEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// Queue between radio callbacks and the node.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A started node with its timer and event tasks. Must be created inside a tokio runtime.
/// Dropping it without `stop` ends both tasks but leaves links open.
pub struct MeshNode {
    ctx: Arc<NodeContext>,
    shutdown: watch::Sender<bool>,
    timer: JoinHandle<()>,
    consumer: JoinHandle<EventReceiver>,
}

impl MeshNode {
    pub fn start(ctx: Arc<NodeContext>, events: EventReceiver) -> Self {
        ctx.start();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let timer = tokio::spawn(role_timer(ctx.clone(), shutdown_rx.clone()));
        let consumer = tokio::spawn(consume_events(ctx.clone(), events, shutdown_rx));
        Self {
            ctx,
            shutdown,
            timer,
            consumer,
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn post(&self, content: &str) -> MessageId {
        self.ctx.post(content)
    }

    pub fn read_all(&self) -> Vec<String> {
        self.ctx.read_all()
    }

    pub fn list_peers(&self) -> BTreeMap<PeerAddress, u32> {
        self.ctx.list_peers()
    }

    pub fn role(&self) -> Role {
        self.ctx.role()
    }

    /// Cancel the timer and event tasks, wait for them, then stop the radio and close
    /// every link. Events still queued are applied to the stopped node, so a link that
    /// connected in the meantime is closed too.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.timer.await {
            tracing::warn!(error = %e, "role timer ended abnormally");
        }
        let events = match self.consumer.await {
            Ok(events) => Some(events),
            Err(e) => {
                tracing::warn!(error = %e, "event consumer ended abnormally");
                None
            }
        };
        self.ctx.stop();
        if let Some(mut events) = events {
            events.close();
            while let Ok(event) = events.try_recv() {
                self.ctx.handle_event(event);
            }
        }
    }
}

async fn role_timer(ctx: Arc<NodeContext>, mut shutdown: watch::Receiver<bool>) {
    let period = ctx.role_switch_interval();
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                ctx.tick();
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("role timer stopped");
}

/// Apply events until shutdown. Hands the receiver back so `stop` can drain it.
async fn consume_events(
    ctx: Arc<NodeContext>,
    mut events: EventReceiver,
    mut shutdown: watch::Receiver<bool>,
) -> EventReceiver {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => ctx.handle_event(event),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("event consumer stopped");
    events
}
