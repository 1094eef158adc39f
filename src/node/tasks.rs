use super::{
    error::{Error, Result},
    penalty::penalty,
    transport::*,
    NodeEvent,
    NodeMessage,
    NodeShared,
    NodeStatus,
};
use crate::{
    config::{Config, NodeConfig},
    constants::CLOSE_NORMAL,
    id::NodeId,
    model::{ConfigureResuming, IncomingMessage, OutgoingMessage, Stats},
};
use flume::{Receiver, RecvError, Sender};
use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tokio::{
    select,
    spawn,
    time::{sleep_until, Instant},
};
use tracing::{debug, debug_span, info, instrument, trace, warn};
use tracing_futures::Instrument;

pub(crate) fn start(
    node: NodeConfig,
    shared: Arc<NodeShared>,
    config: Config,
    rx: Receiver<NodeMessage>,
    events: Sender<(NodeId, NodeEvent)>,
) {
    let span = debug_span!("node", id = %node.id);

    spawn(
        async move {
            trace!("Node runner started.");
            NodeRunner::new(node, shared, config, rx, events)
                .run()
                .await;
            trace!("Node runner finished.");
        }
        .instrument(span),
    );
}

enum Step {
    Command(std::result::Result<NodeMessage, RecvError>),
    Transport(TransportEvent),
    Retry,
}

struct NodeRunner {
    node: NodeConfig,
    shared: Arc<NodeShared>,
    config: Config,
    rx: Receiver<NodeMessage>,
    events: Sender<(NodeId, NodeEvent)>,

    transport: Option<Box<dyn Transport>>,
    retry_at: Option<Instant>,
    last_wait: Option<Duration>,
}

impl NodeRunner {
    fn new(
        node: NodeConfig,
        shared: Arc<NodeShared>,
        config: Config,
        rx: Receiver<NodeMessage>,
        events: Sender<(NodeId, NodeEvent)>,
    ) -> Self {
        Self {
            node,
            shared,
            config,
            rx,
            events,

            transport: None,
            retry_at: None,
            last_wait: None,
        }
    }

    async fn run(&mut self) {
        loop {
            let step = if let Some(transport) = self.transport.as_mut() {
                select! {
                    msg = self.rx.recv_async() => Step::Command(msg),
                    evt = transport.recv() => Step::Transport(evt),
                }
            } else if let Some(at) = self.retry_at {
                select! {
                    msg = self.rx.recv_async() => Step::Command(msg),
                    () = sleep_until(at) => Step::Retry,
                }
            } else {
                Step::Command(self.rx.recv_async().await)
            };

            match step {
                Step::Command(Ok(msg)) => self.handle_command(msg).await,
                // Every handle is gone.
                Step::Command(Err(RecvError::Disconnected)) => break,
                Step::Transport(evt) => self.handle_transport(evt),
                Step::Retry => {
                    self.retry_at = None;
                    self.open().await;
                },
            }
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close(CLOSE_NORMAL).await;
        }
    }

    async fn handle_command(&mut self, msg: NodeMessage) {
        match msg {
            NodeMessage::Connect => {
                if self.transport.is_some() {
                    debug!("Ignoring connect: already connected.");
                    return;
                }

                // A pending retry is brought forward, keeping the outage's count.
                if self.retry_at.take().is_none() {
                    self.last_wait = None;
                    let mut state = self.shared.state.write();
                    state.status = NodeStatus::Connecting;
                    state.reconnect_attempts = 0;
                }

                self.open().await;
            },
            NodeMessage::Close => {
                self.retry_at = None;

                if let Some(mut transport) = self.transport.take() {
                    transport.close(CLOSE_NORMAL).await;
                }

                if self.status() != NodeStatus::Disconnected {
                    info!("Connection closed by client.");
                    self.set_status(NodeStatus::Disconnected);
                    self.emit(NodeEvent::Disconnected);
                }
            },
            NodeMessage::Send {
                message,
                prioritized,
                result,
            } => {
                let outcome = self.send(&message, prioritized).await;
                // Other side may not be listening: this is fine.
                let _ = result.send(outcome);
            },
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => match serde_json::from_str(&text) {
                Ok(IncomingMessage::Stats(stats)) => {
                    self.update_stats(&stats);
                    self.emit(NodeEvent::Message(IncomingMessage::Stats(stats)));
                },
                Ok(IncomingMessage::Unknown) => trace!("Unhandled message: {}", text),
                Ok(msg) => self.emit(NodeEvent::Message(msg)),
                Err(e) => debug!("Unexpected JSON: {}. Payload: {}", e, text),
            },
            TransportEvent::Error(e) => {
                warn!("Transport error: {}.", e);
                self.record_error(e.to_string());
            },
            TransportEvent::Closed {
                code,
                reason,
                clean,
            } => {
                self.transport = None;
                info!(
                    "Connection closed (code: {:?}, reason: {:?}, clean: {}).",
                    code, reason, clean
                );
                self.emit(NodeEvent::Closed {
                    code,
                    reason,
                    clean,
                });
                self.dropped();
            },
        }
    }

    #[instrument(skip(self))]
    async fn open(&mut self) {
        let request = self.request();

        match self.config.connector.connect(request).await {
            Ok(Connected { transport, resumed }) => {
                self.transport = Some(transport);
                self.last_wait = None;
                {
                    let mut state = self.shared.state.write();
                    state.status = NodeStatus::Connected;
                    state.reconnect_attempts = 0;
                }
                info!("Connected (resumed: {}).", resumed);

                let resume = self.config.resume.as_ref().map(|resume| {
                    OutgoingMessage::ConfigureResuming(ConfigureResuming {
                        key: resume.key.clone(),
                        timeout: resume.timeout.as_secs(),
                    })
                });

                if let Some(msg) = resume {
                    if let Err(e) = self.send(&msg, true).await {
                        warn!("Failed to configure resuming: {}.", e);
                    }
                }

                self.emit(NodeEvent::Ready { resumed });
            },
            Err(e) => {
                warn!("Connection attempt failed: {}.", e);
                self.record_error(e.to_string());
                self.dropped();
            },
        }
    }

    fn request(&self) -> ConnectRequest {
        let mut headers = vec![
            ("Authorization", self.node.password.clone()),
            ("User-Id", self.config.user_id.to_string()),
            ("Num-Shards", self.config.shard_count.to_string()),
            ("Client-Name", self.config.client_name.clone()),
        ];

        if let Some(resume) = &self.config.resume {
            headers.push(("Resume-Key", resume.key.clone()));
        }

        ConnectRequest {
            address: self.node.address.clone(),
            secure: self.node.secure,
            headers,
        }
    }

    /// Decides what follows a connection which closed or could not be opened.
    fn dropped(&mut self) {
        if !self.config.auto_reconnect {
            self.set_status(NodeStatus::Disconnected);
            self.emit(NodeEvent::Disconnected);
            return;
        }

        let attempt = {
            let mut state = self.shared.state.write();
            state.reconnect_attempts += 1;
            state.reconnect_attempts
        };

        if self.config.reconnect.exhausted(attempt) {
            let attempts = attempt - 1;
            {
                let mut state = self.shared.state.write();
                state.status = NodeStatus::Disconnected;
                state.reconnect_attempts = attempts;
            }
            warn!("Giving up after {} reconnection attempts.", attempts);
            self.emit(NodeEvent::Exhausted { attempts });
            return;
        }

        let delay = self.config.reconnect.strategy.retry_in(self.last_wait);
        self.last_wait = Some(delay);
        self.retry_at = Some(Instant::now() + delay);
        self.set_status(NodeStatus::Reconnecting);

        info!("Reconnecting in {:?} (attempt {}).", delay, attempt);
        self.emit(NodeEvent::Reconnecting { attempt, delay });
    }

    async fn send(&mut self, message: &OutgoingMessage, prioritized: bool) -> Result<()> {
        let text = serde_json::to_string(message)?;
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;

        trace!("Sending {}.", message.op());
        let outcome = transport.send(text, prioritized).await;

        if let Err(e) = &outcome {
            self.record_error(e.to_string());
        }

        outcome.map_err(Into::into)
    }

    fn update_stats(&self, stats: &Stats) {
        let score = penalty(stats);
        self.shared.penalty.store(score, Ordering::Release);
        self.shared.state.write().stats = Some(stats.clone());

        trace!("Penalty is now {}.", score);
    }

    fn record_error(&self, error: String) {
        self.shared.state.write().last_error = Some(error.clone());
        self.emit(NodeEvent::Error(error));
    }

    fn status(&self) -> NodeStatus {
        self.shared.state.read().status
    }

    fn set_status(&self, status: NodeStatus) {
        self.shared.state.write().status = status;
    }

    fn emit(&self, event: NodeEvent) {
        // The cluster may already be gone.
        let _ = self.events.send((self.node.id.clone(), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ResumeConfig,
        id::test_ids::user,
        node::{retry::Retry, retry::Strategy, test_impls::*, Node},
    };
    use serde_json::json;

    fn node(config: Config) -> (Node, Receiver<(NodeId, NodeEvent)>) {
        let (tx, rx) = flume::unbounded();
        let node = Node::spawn(
            NodeConfig::new("main", "localhost:2333", "youshallnotpass"),
            0,
            config,
            tx,
        );

        (node, rx)
    }

    fn config(connector: &MockConnector) -> Config {
        Config::new(user(1)).connector(Arc::new(connector.clone()))
    }

    fn drain(rx: &Receiver<(NodeId, NodeEvent)>) -> Vec<NodeEvent> {
        rx.try_iter().map(|(_, evt)| evt).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_sends_handshake_and_resume_registration() {
        let connector = MockConnector::default();
        let resume = ResumeConfig {
            key: "resume-me".into(),
            timeout: Duration::from_secs(90),
        };
        let (node, _events) = node(config(&connector).resume(Some(resume)).shard_count(2));

        node.connect();
        wait_until(|| node.is_connected()).await;
        wait_until(|| !connector.sent().is_empty()).await;

        let request = connector.requests().remove(0);
        assert_eq!(request.header("Authorization"), Some("youshallnotpass"));
        assert_eq!(request.header("User-Id"), Some("1"));
        assert_eq!(request.header("Num-Shards"), Some("2"));
        assert_eq!(request.header("Resume-Key"), Some("resume-me"));
        assert!(request.header("Client-Name").is_some());

        assert_eq!(
            connector.sent(),
            vec![json!({ "op": "configureResuming", "key": "resume-me", "timeout": 90 })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_resume_registration_without_resume_config() {
        let connector = MockConnector::default();
        let (node, _events) = node(config(&connector));

        node.connect();
        wait_until(|| node.is_connected()).await;
        settle().await;

        assert!(connector.sent().is_empty());
        assert!(connector.requests()[0].header("Resume-Key").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ready_reports_resumed_sessions() {
        let connector = MockConnector::default();
        connector.resume_sessions(true);
        let (node, events) = node(config(&connector).resume(Some(ResumeConfig::new("k"))));

        node.connect();
        wait_until(|| node.is_connected()).await;
        settle().await;

        assert!(drain(&events)
            .iter()
            .any(|e| matches!(e, NodeEvent::Ready { resumed: true })));
    }

    #[tokio::test(start_paused = true)]
    async fn stats_recompute_penalty() {
        let connector = MockConnector::default();
        let (node, _events) = node(config(&connector));

        node.connect();
        wait_until(|| node.is_connected()).await;

        connector.push_json(json!({
            "op": "stats",
            "players": 4,
            "playingPlayers": 3,
            "uptime": 1000,
            "memory": { "free": 1, "used": 2, "allocated": 3, "reservable": 4 },
            "cpu": { "cores": 4, "systemLoad": 0.0, "lavalinkLoad": 0.0 },
        }));
        wait_until(|| node.penalty() == 3).await;

        connector.push_json(json!({
            "op": "stats",
            "players": 4,
            "playingPlayers": 1,
            "uptime": 2000,
            "memory": { "free": 1, "used": 2, "allocated": 3, "reservable": 4 },
            "cpu": { "cores": 4, "systemLoad": 0.0, "lavalinkLoad": 0.0 },
        }));
        wait_until(|| node.penalty() == 1).await;

        assert_eq!(node.stats().map(|s| s.playing_players), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_gives_up_exactly_once() {
        let connector = MockConnector::default();
        let (node, events) = node(config(&connector));

        node.connect();
        wait_until(|| node.is_connected()).await;

        connector.refuse(true);
        connector.drop_connection();

        wait_until(|| node.status() == NodeStatus::Disconnected).await;
        // Let any stray timer fire.
        tokio::time::sleep(Duration::from_secs(120)).await;

        let events = drain(&events);
        let exhausted: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                NodeEvent::Exhausted { attempts } => Some(*attempts),
                _ => None,
            })
            .collect();
        let retries = events
            .iter()
            .filter(|e| matches!(e, NodeEvent::Reconnecting { .. }))
            .count();

        assert_eq!(exhausted, vec![5]);
        assert_eq!(retries, 5);
        // Initial connection, then five retries.
        assert_eq!(connector.attempts(), 6);
        assert_eq!(node.status(), NodeStatus::Disconnected);
        assert!(node.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_fixed_delay() {
        let connector = MockConnector::default();
        let retry = Retry {
            strategy: Strategy::Every(Duration::from_secs(15)),
            retry_limit: Some(5),
        };
        let (node, _events) = node(config(&connector).reconnect(retry));

        node.connect();
        wait_until(|| node.is_connected()).await;

        let dropped_at = Instant::now();
        connector.drop_connection();
        wait_until(|| node.status() == NodeStatus::Reconnecting).await;
        assert_eq!(node.reconnect_attempts(), 1);

        wait_until(|| node.is_connected()).await;
        assert!(dropped_at.elapsed() >= Duration::from_secs(15));
        assert_eq!(node.reconnect_attempts(), 0);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_disconnects_without_retry() {
        let connector = MockConnector::default();
        let (node, events) = node(config(&connector));

        node.connect();
        wait_until(|| node.is_connected()).await;

        node.close();
        wait_until(|| node.status() == NodeStatus::Disconnected).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let events = drain(&events);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, NodeEvent::Disconnected))
                .count(),
            1
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, NodeEvent::Reconnecting { .. })));
        assert_eq!(connector.attempts(), 1);

        assert!(matches!(
            node.send(
                OutgoingMessage::Destroy(crate::model::GuildTarget {
                    guild_id: "1".into()
                }),
                false
            )
            .await,
            Err(Error::NotConnected)
        ));

        // Restarting the lifecycle.
        node.connect();
        wait_until(|| node.is_connected()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn drop_without_auto_reconnect_disconnects() {
        let connector = MockConnector::default();
        let (node, events) = node(config(&connector).auto_reconnect(false));

        node.connect();
        wait_until(|| node.is_connected()).await;
        connector.drop_connection();

        wait_until(|| node.status() == NodeStatus::Disconnected).await;
        settle().await;

        let events = drain(&events);
        assert!(events.iter().any(|e| matches!(e, NodeEvent::Disconnected)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, NodeEvent::Exhausted { .. })));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_do_not_change_state() {
        let connector = MockConnector::default();
        let (node, events) = node(config(&connector));

        node.connect();
        wait_until(|| node.is_connected()).await;

        connector.push(TransportEvent::Error(TransportError::Closed));
        wait_until(|| node.last_error().is_some()).await;

        assert!(node.is_connected());
        assert!(drain(&events)
            .iter()
            .any(|e| matches!(e, NodeEvent::Error(_))));
    }
}
