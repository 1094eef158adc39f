//! Scripted connections for exercising nodes without a network.

use super::{transport::*, Node};
use crate::{
    config::{Config, NodeConfig},
    id::test_ids::user,
};
use async_trait::async_trait;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    io::{Error as IoError, ErrorKind},
    sync::Arc,
    time::Duration,
};

/// Connector whose connections are driven by the test holding it.
///
/// Only the most recent connection is live.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    refuse: bool,
    resumed: bool,
    requests: Vec<ConnectRequest>,
    sent: Vec<(Value, bool)>,
    live: Option<Sender<TransportEvent>>,
}

impl MockConnector {
    /// Makes future connection attempts fail.
    pub(crate) fn refuse(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Makes future connections report a resumed session.
    pub(crate) fn resume_sessions(&self, resumed: bool) {
        self.state.lock().resumed = resumed;
    }

    pub(crate) fn attempts(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub(crate) fn requests(&self) -> Vec<ConnectRequest> {
        self.state.lock().requests.clone()
    }

    /// Every message sent over any connection, oldest first.
    pub(crate) fn sent(&self) -> Vec<Value> {
        self.state
            .lock()
            .sent
            .iter()
            .map(|(v, _)| v.clone())
            .collect()
    }

    /// Every message sent with the given op, with its priority hint.
    pub(crate) fn sent_op(&self, op: &str) -> Vec<(Value, bool)> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(v, _)| v["op"] == op)
            .cloned()
            .collect()
    }

    pub(crate) fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Delivers an event on the live connection.
    pub(crate) fn push(&self, event: TransportEvent) {
        if let Some(tx) = &self.state.lock().live {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn push_json(&self, value: Value) {
        self.push(TransportEvent::Message(value.to_string()));
    }

    /// Closes the live connection from the node's side.
    pub(crate) fn drop_connection(&self) {
        let mut state = self.state.lock();
        if let Some(tx) = state.live.take() {
            let _ = tx.send(TransportEvent::Closed {
                code: Some(1006),
                reason: "connection reset".into(),
                clean: false,
            });
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Connected, TransportError> {
        let mut state = self.state.lock();
        state.requests.push(request);

        if state.refuse {
            return Err(IoError::new(ErrorKind::ConnectionRefused, "refused").into());
        }

        let (tx, rx) = flume::unbounded();
        state.live = Some(tx);

        Ok(Connected {
            transport: Box::new(MockTransport {
                rx,
                state: self.state.clone(),
            }),
            resumed: state.resumed,
        })
    }
}

struct MockTransport {
    rx: Receiver<TransportEvent>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String, prioritized: bool) -> Result<(), TransportError> {
        let value = serde_json::from_str(&text)
            .map_err(|e| IoError::new(ErrorKind::InvalidData, e.to_string()))?;
        self.state.lock().sent.push((value, prioritized));

        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        self.rx
            .recv_async()
            .await
            .unwrap_or_else(|_| TransportEvent::Closed {
                code: None,
                reason: "connection replaced".into(),
                clean: false,
            })
    }

    async fn close(&mut self, _code: u16) {}
}

/// Polls `done` until it holds, letting the (paused) clock advance in between.
pub(crate) async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if done() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("condition not reached");
}

/// Lets background tasks run until they are idle.
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Spawns a node over `connector`, and waits for it to connect.
pub(crate) async fn connected_node(id: &str, index: usize, connector: &MockConnector) -> Node {
    let (tx, _rx) = flume::unbounded();
    let node = Node::spawn(
        NodeConfig::new(id, "localhost:2333", "youshallnotpass"),
        index,
        Config::new(user(1)).connector(Arc::new(connector.clone())),
        tx,
    );

    node.connect();
    wait_until(|| node.is_connected()).await;

    node
}
