//! Async driver: runs a [`Reflector`] on its own tokio task.
//!
//! The reflector itself is synchronous. The driver owns it and feeds it
//! from a single control channel plus a periodic tick, so replies, ticks
//! and externally submitted sessions are serialised without locks.
//!
//! ```text
//!   transport ──Reply──► ControllerHandle ──► [task: select! biased]
//!                                                  │  control msgs first
//!                                                  │  then interval tick
//!                                                  ▼
//!                                             Reflector ──► ChannelCommunicator ──► transport
//! ```

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::command::Session;
use crate::communicator::{Communicator, Reply, Request};
use crate::error::{ControllerError, ControllerResult};
use crate::node::NodeId;
use crate::reflector::{Hooks, Reflector};

/// A [`Communicator`] that forwards requests to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelCommunicator {
    tx: mpsc::UnboundedSender<Request>,
}

impl Communicator for ChannelCommunicator {
    fn send(&mut self, request: Request) {
        if self.tx.send(request).is_err() {
            warn!("transport receiver dropped, request discarded");
        }
    }
}

/// The communicator plus the receiving end the transport reads from.
pub fn channel() -> (ChannelCommunicator, mpsc::UnboundedReceiver<Request>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelCommunicator { tx }, rx)
}

#[derive(Debug)]
pub enum ControlMessage {
    Reply(Reply),
    Communicate(Session),
    Disconnect(NodeId),
    Shutdown,
}

/// Cloneable sender side of a running driver.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ControllerHandle {
    fn send(&self, msg: ControlMessage) -> ControllerResult<()> {
        self.tx.send(msg).map_err(|_| ControllerError::ChannelClosed)
    }

    pub fn deliver(&self, reply: Reply) -> ControllerResult<()> {
        self.send(ControlMessage::Reply(reply))
    }

    pub fn communicate(&self, session: Session) -> ControllerResult<()> {
        self.send(ControlMessage::Communicate(session))
    }

    pub fn disconnect(&self, node: NodeId) -> ControllerResult<()> {
        self.send(ControlMessage::Disconnect(node))
    }

    pub fn shutdown(&self) -> ControllerResult<()> {
        self.send(ControlMessage::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Move `reflector` onto a new task ticking every `tick`.
///
/// The task ends on [`ControlMessage::Shutdown`] or when every handle is
/// dropped, and hands the reflector back.
pub fn spawn<C, H>(reflector: Reflector<C, H>, tick: Duration) -> (ControllerHandle, JoinHandle<Reflector<C, H>>)
where
    C: Communicator + Send + 'static,
    H: Hooks + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(reflector, rx, tick));
    (ControllerHandle { tx }, task)
}

async fn run<C: Communicator, H: Hooks>(
    mut reflector: Reflector<C, H>,
    mut rx: mpsc::UnboundedReceiver<ControlMessage>,
    tick: Duration,
) -> Reflector<C, H> {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;
    info!(tick_ms = tick.as_millis() as u64, "reflector task started");

    loop {
        tokio::select! {
            biased;

            msg = rx.recv() => match msg {
                Some(ControlMessage::Reply(reply)) => {
                    if let Err(err) = reflector.on_reply(reply) {
                        debug!(code = err.code(), %err, "reply rejected");
                    }
                }
                Some(ControlMessage::Communicate(session)) => {
                    reflector.communicate(session);
                }
                Some(ControlMessage::Disconnect(node)) => {
                    reflector.disconnect(node);
                }
                Some(ControlMessage::Shutdown) => {
                    info!("reflector task shutting down");
                    break;
                }
                None => {
                    info!("control channel closed");
                    break;
                }
            },

            _ = interval.tick() => {
                let removed = reflector.tick();
                if !removed.is_empty() {
                    info!(count = removed.len(), "nodes expired");
                }
            }
        }
    }
    reflector
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::communicator::Status;
    use crate::frame::SlotFrame;
    use crate::mesh::Mesh;
    use crate::node::testing::node;
    use crate::reflector::NoHooks;

    struct TickCounter(Arc<AtomicU32>);

    impl Hooks for TickCounter {
        fn tick(&mut self, _mesh: &mut Mesh) -> Vec<Session> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_replies_flow_through_the_task() {
        let (comm, mut requests) = channel();
        let mut reflector = Reflector::new(Mesh::new(node(0)), comm, NoHooks);
        reflector.start(vec![SlotFrame::new("B", 25)], "B", &[]).unwrap();
        let (handle, task) = spawn(reflector, Duration::from_secs(3600));

        let observe = requests.recv().await.unwrap();
        assert_eq!(observe.path.to_string(), "rpl/c");
        let frame = requests.recv().await.unwrap();
        assert_eq!(frame.path.to_string(), "6t/6/sf");

        handle
            .deliver(Reply::answer(&frame, Status::Created, json!({"fd": 4})))
            .unwrap();
        let cell = requests.recv().await.unwrap();
        assert_eq!(cell.path.to_string(), "6t/6/cl");
        assert_eq!(cell.body.as_ref().unwrap()["fd"], 4);

        handle.shutdown().unwrap();
        let reflector = task.await.unwrap();
        assert_eq!(reflector.mesh().frame("B").unwrap().alias_id(node(0)), Some(4));
        assert!(handle.is_closed());
        assert_eq!(handle.deliver(Reply::answer(&cell, Status::Created, json!({"cd": 0}))), Err(ControllerError::ChannelClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_drives_ticks() {
        let ticks = Arc::new(AtomicU32::new(0));
        let (comm, _requests) = channel();
        let reflector = Reflector::new(Mesh::new(node(0)), comm, TickCounter(ticks.clone()));
        let (handle, task) = spawn(reflector, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.shutdown().unwrap();
        task.await.unwrap();
        let n = ticks.load(Ordering::SeqCst);
        assert!((3..=4).contains(&n), "ticks = {}", n);
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_the_task() {
        let (comm, _requests) = channel();
        let reflector = Reflector::new(Mesh::new(node(0)), comm, NoHooks);
        let (handle, task) = spawn(reflector, Duration::from_secs(3600));
        drop(handle);
        let reflector = task.await.unwrap();
        assert_eq!(reflector.in_flight(), 0);
    }
}
