//! Tag-query publish/subscribe server.
//!
//! Events are published with a string tag map; subscribers register a
//! [`Query`] over those tags and receive every matching event on their own
//! channel. A dedicated command thread owns the subscription list, so
//! subscribe/unsubscribe/publish are totally ordered.

use {
    crate::{error::PubSubError, events::EventData},
    crossbeam_channel::{bounded, Receiver, Sender},
    log::{debug, info},
    std::{
        collections::HashMap,
        fmt,
        sync::Mutex,
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
};

/// Reserved tag key carrying the event type.
pub const EVENT_TYPE_KEY: &str = "tm.events.type";

/// Capacity of the server's command queue. Subscribe calls time out when
/// the queue stays saturated past their deadline.
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// A conjunction of `key=value` equality conditions over event tags.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Query {
    conditions: Vec<(String, String)>,
}

impl Query {
    /// Parse a query of the form `key=value` or
    /// `key=value AND key2=value2 AND ...`.
    pub fn parse(input: &str) -> Result<Self, PubSubError> {
        let mut conditions = Vec::new();
        for clause in input.split(" AND ") {
            let clause = clause.trim();
            let (key, value) = clause
                .split_once('=')
                .ok_or_else(|| PubSubError::InvalidQuery(input.to_string()))?;
            if key.trim().is_empty() || value.trim().is_empty() {
                return Err(PubSubError::InvalidQuery(input.to_string()));
            }
            conditions.push((key.trim().to_string(), value.trim().to_string()));
        }
        if conditions.is_empty() {
            return Err(PubSubError::InvalidQuery(input.to_string()));
        }
        Ok(Self { conditions })
    }

    /// Parse a query known to be valid at compile time.
    ///
    /// # Panics
    ///
    /// Panics when the query does not parse.
    pub fn must_parse(input: &str) -> Self {
        Self::parse(input).expect("static query must parse")
    }

    /// True when every condition matches the tag map.
    pub fn matches(&self, tags: &HashMap<String, String>) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| tags.get(key).is_some_and(|tag| tag == value))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.conditions.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

enum Command {
    Subscribe {
        subscriber: String,
        query: Query,
        out: Sender<EventData>,
        resp: Sender<Result<(), PubSubError>>,
    },
    Unsubscribe {
        subscriber: String,
        query: Query,
        resp: Sender<Result<(), PubSubError>>,
    },
    UnsubscribeAll {
        subscriber: String,
        resp: Sender<Result<(), PubSubError>>,
    },
    Publish {
        data: EventData,
        tags: HashMap<String, String>,
    },
    Stop,
}

struct Subscription {
    subscriber: String,
    query: Query,
    out: Sender<EventData>,
}

/// The pub/sub server handle. Cloneable via `Arc`; stopping it disconnects
/// every subscriber.
pub struct PubSubServer {
    cmd_tx: Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PubSubServer {
    /// Start the server's command thread.
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let handle = thread::Builder::new()
            .name("consPubSub".to_string())
            .spawn(move || Self::run(cmd_rx))
            .expect("failed to spawn pubsub thread");
        Self {
            cmd_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Register `out` to receive every event matching `query`.
    ///
    /// `timeout` bounds the whole subscribe handshake; a saturated or
    /// stopped server yields `SubscribeTimeout` / `Stopped`.
    pub fn subscribe(
        &self,
        subscriber: &str,
        query: Query,
        out: Sender<EventData>,
        timeout: Duration,
    ) -> Result<(), PubSubError> {
        let deadline = Instant::now() + timeout;
        let (resp_tx, resp_rx) = bounded(1);
        self.send_command_by(
            Command::Subscribe {
                subscriber: subscriber.to_string(),
                query,
                out,
                resp: resp_tx,
            },
            deadline,
        )?;
        Self::await_response(&resp_rx, deadline)
    }

    /// Remove one (subscriber, query) registration.
    pub fn unsubscribe(&self, subscriber: &str, query: Query) -> Result<(), PubSubError> {
        let deadline = Instant::now() + Duration::from_secs(1);
        let (resp_tx, resp_rx) = bounded(1);
        self.send_command_by(
            Command::Unsubscribe {
                subscriber: subscriber.to_string(),
                query,
                resp: resp_tx,
            },
            deadline,
        )?;
        Self::await_response(&resp_rx, deadline)
    }

    /// Remove every registration of a subscriber.
    pub fn unsubscribe_all(&self, subscriber: &str) -> Result<(), PubSubError> {
        let deadline = Instant::now() + Duration::from_secs(1);
        let (resp_tx, resp_rx) = bounded(1);
        self.send_command_by(
            Command::UnsubscribeAll {
                subscriber: subscriber.to_string(),
                resp: resp_tx,
            },
            deadline,
        )?;
        Self::await_response(&resp_rx, deadline)
    }

    /// Deliver an event to every subscription whose query matches `tags`.
    /// Blocks while the command queue is full; no delivery deadline.
    pub fn publish_with_tags(
        &self,
        data: EventData,
        tags: HashMap<String, String>,
    ) -> Result<(), PubSubError> {
        self.cmd_tx
            .send(Command::Publish { data, tags })
            .map_err(|_| PubSubError::Stopped)
    }

    /// Stop the command thread. Subscribers observe disconnection.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
        if let Some(handle) = self.handle.lock().expect("pubsub handle lock").take() {
            let _ = handle.join();
        }
    }

    fn send_command_by(&self, cmd: Command, deadline: Instant) -> Result<(), PubSubError> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        self.cmd_tx.send_timeout(cmd, timeout).map_err(|e| match e {
            crossbeam_channel::SendTimeoutError::Timeout(_) => PubSubError::SubscribeTimeout,
            crossbeam_channel::SendTimeoutError::Disconnected(_) => PubSubError::Stopped,
        })
    }

    fn await_response(
        resp_rx: &Receiver<Result<(), PubSubError>>,
        deadline: Instant,
    ) -> Result<(), PubSubError> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match resp_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(PubSubError::SubscribeTimeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(PubSubError::Stopped),
        }
    }

    fn run(cmd_rx: Receiver<Command>) {
        let mut subs: Vec<Subscription> = Vec::new();
        for cmd in cmd_rx.iter() {
            match cmd {
                Command::Subscribe {
                    subscriber,
                    query,
                    out,
                    resp,
                } => {
                    let duplicate = subs
                        .iter()
                        .any(|s| s.subscriber == subscriber && s.query == query);
                    let result = if duplicate {
                        Err(PubSubError::AlreadySubscribed(
                            subscriber.clone(),
                            query.to_string(),
                        ))
                    } else {
                        subs.push(Subscription {
                            subscriber,
                            query,
                            out,
                        });
                        Ok(())
                    };
                    let _ = resp.send(result);
                }
                Command::Unsubscribe {
                    subscriber,
                    query,
                    resp,
                } => {
                    let before = subs.len();
                    subs.retain(|s| !(s.subscriber == subscriber && s.query == query));
                    let result = if subs.len() == before {
                        Err(PubSubError::SubscriptionNotFound(subscriber))
                    } else {
                        Ok(())
                    };
                    let _ = resp.send(result);
                }
                Command::UnsubscribeAll { subscriber, resp } => {
                    let before = subs.len();
                    subs.retain(|s| s.subscriber != subscriber);
                    let result = if subs.len() == before {
                        Err(PubSubError::SubscriptionNotFound(subscriber))
                    } else {
                        Ok(())
                    };
                    let _ = resp.send(result);
                }
                Command::Publish { data, tags } => {
                    // Delivery blocks on full subscriber channels; a dropped
                    // receiver removes its subscription.
                    subs.retain(|s| {
                        if !s.query.matches(&tags) {
                            return true;
                        }
                        if s.out.send(data.clone()).is_err() {
                            debug!("dropping dead subscription of {}", s.subscriber);
                            return false;
                        }
                        true
                    });
                }
                Command::Stop => break,
            }
        }
        info!("pubsub server stopped ({} subscriptions dropped)", subs.len());
    }
}

impl Default for PubSubServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crossbeam_channel::unbounded};

    fn tags_of(event_type: &str) -> HashMap<String, String> {
        let mut tags = HashMap::new();
        tags.insert(EVENT_TYPE_KEY.to_string(), event_type.to_string());
        tags
    }

    fn some_event() -> EventData {
        EventData::Tx(crate::events::EventDataTx {
            height: 1,
            tx: crate::block::Tx(vec![1]),
            data: vec![],
            log: String::new(),
            code: 0,
            error: String::new(),
        })
    }

    #[test]
    fn test_query_parse_and_match() {
        let q = Query::parse("tm.events.type=NewBlock").unwrap();
        assert!(q.matches(&tags_of("NewBlock")));
        assert!(!q.matches(&tags_of("Vote")));
        assert!(!q.matches(&HashMap::new()));
    }

    #[test]
    fn test_query_conjunction() {
        let q = Query::parse("tm.events.type=Tx AND account=abcd").unwrap();
        let mut tags = tags_of("Tx");
        assert!(!q.matches(&tags));
        tags.insert("account".to_string(), "abcd".to_string());
        assert!(q.matches(&tags));
        assert_eq!(q.to_string(), "tm.events.type=Tx AND account=abcd");
    }

    #[test]
    fn test_query_parse_rejects_garbage() {
        assert!(Query::parse("").is_err());
        assert!(Query::parse("no-equals-sign").is_err());
        assert!(Query::parse("=value").is_err());
    }

    #[test]
    fn test_subscribe_publish_unsubscribe() {
        let server = PubSubServer::new();
        let (tx, rx) = unbounded();
        let query = Query::must_parse("tm.events.type=NewBlock");
        server
            .subscribe("test", query.clone(), tx, Duration::from_millis(100))
            .unwrap();

        server
            .publish_with_tags(some_event(), tags_of("NewBlock"))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());

        // Non-matching events are not delivered.
        server
            .publish_with_tags(some_event(), tags_of("Vote"))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        server.unsubscribe("test", query.clone()).unwrap();
        assert_eq!(
            server.unsubscribe("test", query),
            Err(PubSubError::SubscriptionNotFound("test".to_string()))
        );
        server.stop();
    }

    #[test]
    fn test_duplicate_subscription_rejected() {
        let server = PubSubServer::new();
        let (tx, _rx) = unbounded();
        let (tx2, _rx2) = unbounded();
        let query = Query::must_parse("tm.events.type=Vote");
        server
            .subscribe("dup", query.clone(), tx, Duration::from_millis(100))
            .unwrap();
        let err = server
            .subscribe("dup", query, tx2, Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, PubSubError::AlreadySubscribed(..)));
        server.stop();
    }

    #[test]
    fn test_unsubscribe_all_wakes_receiver() {
        let server = PubSubServer::new();
        let (tx, rx) = unbounded();
        server
            .subscribe(
                "all",
                Query::must_parse("tm.events.type=Vote"),
                tx,
                Duration::from_millis(100),
            )
            .unwrap();
        server.unsubscribe_all("all").unwrap();
        // The subscription's sender is dropped with it.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        server.stop();
    }

    #[test]
    fn test_stopped_server_errors() {
        let server = PubSubServer::new();
        server.stop();
        assert_eq!(
            server.publish_with_tags(some_event(), tags_of("Vote")),
            Err(PubSubError::Stopped)
        );
    }
}
