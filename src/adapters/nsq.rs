//! NSQ Cluster Observer
//!
//! Polls nsqlookupd for the set of live nsqd nodes and every nsqd for its
//! topic/channel stats, emitting the results as [`Observation`]s.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::{ClusterObserver, NodeIdentity, NodeStats, Observation, TopicMeta};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the NSQ cluster observer
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// nsqlookupd HTTP addresses (`host:port`)
    pub lookupd_http_addresses: Vec<String>,

    /// Only report topics with this prefix, stripping it from the name
    pub topic_namespace: Option<String>,

    /// Time between nsqd stats polls
    pub nsqd_poll_interval: Duration,

    /// Time between nsqlookupd node list polls
    pub lookupd_poll_interval: Duration,

    /// Timeout for a single HTTP request
    pub request_timeout: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            lookupd_http_addresses: vec!["127.0.0.1:4161".to_string()],
            topic_namespace: None,
            nsqd_poll_interval: Duration::from_secs(30),
            lookupd_poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl ObserverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lookupd_http_addresses.is_empty() {
            return Err(Error::Config(
                "at least one lookupd http address is required".to_string(),
            ));
        }
        if self.nsqd_poll_interval.is_zero() || self.lookupd_poll_interval.is_zero() {
            return Err(Error::Config(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// nsqlookupd / nsqd Response Types
// =============================================================================

/// nsq before 1.0 wraps every answer in `{"status_code", "status_txt", "data"}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Legacy { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Legacy { data } => data,
            Envelope::Bare(inner) => inner,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodesResponse {
    producers: Vec<NodeIdentity>,
}

#[derive(Debug, Clone, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    version: String,
    #[serde(default)]
    health: String,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    topics: Vec<TopicStats>,
}

#[derive(Debug, Clone, Deserialize)]
struct TopicStats {
    topic_name: String,
    #[serde(default)]
    channels: Vec<ChannelStats>,
    #[serde(default)]
    depth: u64,
    #[serde(default)]
    message_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelStats {
    channel_name: String,
    #[serde(default)]
    depth: u64,
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice::<Envelope<T>>(body).map(Envelope::into_inner)
}

/// `http://` URL for an address that may or may not carry a scheme.
fn endpoint(address: &str, path: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{}{}", address, path)
    } else {
        format!("http://{}{}", address, path)
    }
}

// =============================================================================
// Stats Round
// =============================================================================

#[derive(Debug, Default)]
struct TopicTotals {
    depth: u64,
    channels: HashMap<String, u64>,
}

/// Folds the stats of every node polled in one round into observations.
///
/// Topics without channels are reported per node right away; channel depths
/// are summed across nodes and reported once per topic by [`finish`](Self::finish).
#[derive(Debug, Default)]
struct StatsRound {
    namespace: Option<String>,
    topics: BTreeMap<String, TopicTotals>,
}

impl StatsRound {
    fn new(namespace: Option<&str>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            topics: BTreeMap::new(),
        }
    }

    fn topic_name<'a>(&self, raw: &'a str) -> Option<&'a str> {
        match &self.namespace {
            Some(ns) => raw.strip_prefix(ns.as_str()),
            None => Some(raw),
        }
    }

    fn observe(&mut self, node: &NodeIdentity, stats: StatsResponse) -> Vec<Observation> {
        let mut out = Vec::with_capacity(stats.topics.len() + 1);
        out.push(Observation::Status {
            stats: NodeStats {
                version: stats.version,
                health: stats.health,
                start_time: stats.start_time,
                topic_count: stats.topics.len(),
            },
            node: node.clone(),
        });

        for topic in stats.topics {
            let Some(name) = self.topic_name(&topic.topic_name) else {
                continue;
            };

            if topic.channels.is_empty() {
                out.push(Observation::TopicDepth {
                    topic: name.to_string(),
                    depth: topic.depth,
                    meta: TopicMeta {
                        message_count: topic.message_count,
                    },
                    node: node.clone(),
                });
                continue;
            }

            let totals = self.topics.entry(name.to_string()).or_default();
            totals.depth = totals.depth.saturating_add(topic.depth);
            for channel in topic.channels {
                let depth = totals.channels.entry(channel.channel_name).or_insert(0);
                *depth = depth.saturating_add(channel.depth);
            }
        }

        out
    }

    fn finish(self) -> Vec<Observation> {
        self.topics
            .into_iter()
            .map(|(topic, totals)| Observation::TopicChannelDepth {
                topic,
                depth: totals.depth,
                channels: totals.channels,
            })
            .collect()
    }
}

// =============================================================================
// Cluster Observer
// =============================================================================

/// Polls an NSQ cluster over HTTP
pub struct NsqClusterObserver {
    config: ObserverConfig,
    client: Client,
    nodes: RwLock<Vec<NodeIdentity>>,
}

impl NsqClusterObserver {
    /// Create a new observer
    pub fn new(config: ObserverConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            nodes: RwLock::new(Vec::new()),
        })
    }

    /// Nodes found by the last successful lookupd round.
    pub fn known_nodes(&self) -> Vec<NodeIdentity> {
        self.nodes.read().clone()
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/vnd.nsq; version=1.0")
            .send()
            .await
            .map_err(Error::ObserverConnection)?;

        if !response.status().is_success() {
            return Err(Error::ObserverResponse {
                endpoint: url.to_string(),
                reason: format!("status {}", response.status()),
            });
        }

        let body = response.bytes().await.map_err(Error::ObserverConnection)?;
        decode(&body).map_err(|e| Error::ObserverResponse {
            endpoint: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Query every lookupd and replace the node set with the union of their
    /// producers.
    ///
    /// Returns the error observations and whether any lookupd answered. The
    /// node set is left alone when none did.
    #[instrument(skip(self))]
    async fn lookupd_round(&self) -> (Vec<Observation>, bool) {
        let requests = self.config.lookupd_http_addresses.iter().map(|address| {
            let url = endpoint(address, "/nodes");
            async move { self.get_json::<NodesResponse>(&url).await }
        });

        let mut errors = Vec::new();
        let mut nodes = HashSet::new();
        let mut synced = false;

        for result in join_all(requests).await {
            match result {
                Ok(response) => {
                    synced = true;
                    nodes.extend(response.producers);
                }
                Err(e) => {
                    warn!(error = %e, "lookupd poll failed");
                    errors.push(Observation::error(e.to_string()));
                }
            }
        }

        if synced {
            debug!(count = nodes.len(), "Refreshed nsqd node list");
            *self.nodes.write() = nodes.into_iter().collect();
        }

        (errors, synced)
    }

    /// Poll every known nsqd once.
    #[instrument(skip(self))]
    async fn nsqd_round(&self) -> Vec<Observation> {
        let nodes = self.known_nodes();
        let requests = nodes.iter().map(|node| {
            let url = endpoint(&node.to_string(), "/stats?format=json");
            async move { (node, self.get_json::<StatsResponse>(&url).await) }
        });

        let mut round = StatsRound::new(self.config.topic_namespace.as_deref());
        let mut out = Vec::new();

        for (node, result) in join_all(requests).await {
            match result {
                Ok(stats) => out.extend(round.observe(node, stats)),
                Err(e) => {
                    warn!(node = %node, error = %e, "nsqd poll failed");
                    out.push(Observation::error(e.to_string()));
                }
            }
        }

        out.extend(round.finish());
        out
    }
}

impl std::fmt::Debug for NsqClusterObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NsqClusterObserver")
            .field("config", &self.config)
            .field("known_nodes", &self.nodes.read().len())
            .finish()
    }
}

#[async_trait]
impl ClusterObserver for NsqClusterObserver {
    async fn run(
        &self,
        events: mpsc::Sender<Observation>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(
            lookupd = ?self.config.lookupd_http_addresses,
            "Starting NSQ cluster observer"
        );

        let mut lookupd_tick = interval(self.config.lookupd_poll_interval);
        lookupd_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut nsqd_tick = interval(self.config.nsqd_poll_interval);
        nsqd_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ready = false;

        loop {
            let batch = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("NSQ cluster observer shutting down");
                    return Ok(());
                }

                _ = lookupd_tick.tick() => {
                    let (mut batch, synced) = self.lookupd_round().await;
                    if synced && !ready {
                        ready = true;
                        batch.push(Observation::Ready);
                    }
                    batch
                }

                _ = nsqd_tick.tick() => self.nsqd_round().await,
            };

            for observation in batch {
                if events.send(observation).await.is_err() {
                    debug!("Observation receiver dropped");
                    return Ok(());
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use http_body_util::Full;
    use hyper::body::{Bytes, Incoming};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    const STATS_JSON: &str = r#"{
        "version": "1.2.1",
        "health": "OK",
        "start_time": 1700000000,
        "topics": [
            {
                "topic_name": "orders",
                "depth": 4,
                "backend_depth": 0,
                "message_count": 120,
                "paused": false,
                "channels": [
                    {"channel_name": "billing", "depth": 3, "in_flight_count": 1},
                    {"channel_name": "shipping", "depth": 1}
                ]
            },
            {
                "topic_name": "audit",
                "depth": 7,
                "message_count": 9,
                "channels": []
            }
        ]
    }"#;

    fn node(address: &str) -> NodeIdentity {
        NodeIdentity::new(address, 4151)
    }

    fn stats() -> StatsResponse {
        decode(STATS_JSON.as_bytes()).unwrap()
    }

    /// Local HTTP server answering `/nodes` with a producer list that points
    /// back at itself and `/stats` with `STATS_JSON`.
    async fn fake_cluster() -> (SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let nodes = format!(
            r#"{{"producers":[{{"broadcast_address":"127.0.0.1","http_port":{},"tcp_port":4150,"version":"1.2.1"}}]}}"#,
            addr.port()
        );
        let stop = CancellationToken::new();
        let token = stop.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = tokio::select! {
                    _ = token.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(_) => return,
                    },
                };
                let nodes = nodes.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let body = match req.uri().path() {
                            "/nodes" => nodes.clone(),
                            "/stats" => STATS_JSON.to_string(),
                            _ => String::new(),
                        };
                        async move { Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body)))) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        (addr, stop)
    }

    fn fake_cluster_config(addr: SocketAddr) -> ObserverConfig {
        ObserverConfig {
            lookupd_http_addresses: vec![addr.to_string()],
            nsqd_poll_interval: Duration::from_millis(50),
            lookupd_poll_interval: Duration::from_millis(50),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_observer_config_default() {
        let config = ObserverConfig::default();

        assert_eq!(config.nsqd_poll_interval, Duration::from_secs(30));
        assert_eq!(config.lookupd_poll_interval, Duration::from_secs(30));
        assert!(config.topic_namespace.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_observer_config_validation() {
        let empty = ObserverConfig {
            lookupd_http_addresses: vec![],
            ..Default::default()
        };
        assert_matches!(empty.validate(), Err(Error::Config(_)));

        let zero = ObserverConfig {
            nsqd_poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(zero.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(endpoint("lookupd:4161", "/nodes"), "http://lookupd:4161/nodes");
        assert_eq!(
            endpoint("https://lookupd:4161/", "/nodes"),
            "https://lookupd:4161/nodes"
        );
    }

    #[test]
    fn test_decode_nodes_bare_and_legacy() {
        let bare = r#"{"producers": [{"broadcast_address": "10.0.0.1", "http_port": 4151, "tcp_port": 4150}]}"#;
        let legacy = r#"{"status_code": 200, "status_txt": "OK", "data": {"producers": [{"broadcast_address": "10.0.0.2", "http_port": 4151}]}}"#;

        let bare: NodesResponse = decode(bare.as_bytes()).unwrap();
        let legacy: NodesResponse = decode(legacy.as_bytes()).unwrap();

        assert_eq!(bare.producers, vec![node("10.0.0.1")]);
        assert_eq!(legacy.producers, vec![node("10.0.0.2")]);
    }

    #[test]
    fn test_decode_stats() {
        let stats = stats();

        assert_eq!(stats.version, "1.2.1");
        assert_eq!(stats.topics.len(), 2);
        assert_eq!(
            stats.start_time,
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0)
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode::<NodesResponse>(b"<html>bad gateway</html>").is_err());
    }

    #[test]
    fn test_round_emits_status_and_channelless_topics() {
        let mut round = StatsRound::new(None);

        let out = round.observe(&node("10.0.0.1"), stats());

        assert_eq!(out.len(), 2);
        assert_matches!(&out[0], Observation::Status { stats, node: n } => {
            assert_eq!(stats.topic_count, 2);
            assert_eq!(n, &node("10.0.0.1"));
        });
        assert_eq!(
            out[1],
            Observation::TopicDepth {
                topic: "audit".to_string(),
                depth: 7,
                meta: TopicMeta { message_count: 9 },
                node: node("10.0.0.1"),
            }
        );
    }

    #[test]
    fn test_round_sums_channels_across_nodes() {
        let mut round = StatsRound::new(None);
        round.observe(&node("10.0.0.1"), stats());
        round.observe(&node("10.0.0.2"), stats());

        let out = round.finish();

        assert_eq!(out.len(), 1);
        assert_matches!(&out[0], Observation::TopicChannelDepth { topic, depth, channels } => {
            assert_eq!(topic, "orders");
            assert_eq!(*depth, 8);
            assert_eq!(channels.get("billing"), Some(&6));
            assert_eq!(channels.get("shipping"), Some(&2));
        });
    }

    #[test]
    fn test_round_applies_namespace() {
        let json = r#"{"topics": [
            {"topic_name": "shop.orders", "depth": 1, "message_count": 2},
            {"topic_name": "other.orders", "depth": 5, "message_count": 5}
        ]}"#;
        let stats: StatsResponse = decode(json.as_bytes()).unwrap();
        let mut round = StatsRound::new(Some("shop."));

        let out = round.observe(&node("10.0.0.1"), stats);

        let topics: Vec<&str> = out
            .iter()
            .filter_map(|o| match o {
                Observation::TopicDepth { topic, .. } => Some(topic.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(topics, vec!["orders"]);
    }

    #[tokio::test]
    async fn test_lookupd_round_connection_refused() {
        let config = ObserverConfig {
            lookupd_http_addresses: vec!["127.0.0.1:19999".to_string()],
            request_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let observer = NsqClusterObserver::new(config).unwrap();

        let (errors, synced) = observer.lookupd_round().await;

        assert!(!synced);
        assert_eq!(errors.len(), 1);
        assert_matches!(&errors[0], Observation::Error { .. });
        assert!(observer.known_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_nsqd_round_without_nodes_is_empty() {
        let observer = NsqClusterObserver::new(ObserverConfig::default()).unwrap();

        assert!(observer.nsqd_round().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_reports_errors_and_stops_on_cancel() {
        let config = ObserverConfig {
            lookupd_http_addresses: vec!["127.0.0.1:19999".to_string()],
            request_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let observer = NsqClusterObserver::new(config).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { observer.run(tx, shutdown).await })
        };

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_matches!(first, Some(Observation::Error { .. }));

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rounds_against_live_cluster() {
        let (addr, stop) = fake_cluster().await;
        let observer = NsqClusterObserver::new(fake_cluster_config(addr)).unwrap();

        let (errors, synced) = observer.lookupd_round().await;
        assert!(synced);
        assert!(errors.is_empty());
        assert_eq!(
            observer.known_nodes(),
            vec![NodeIdentity::new("127.0.0.1", addr.port())]
        );

        let events = observer.nsqd_round().await;
        let kinds: Vec<_> = events.iter().map(Observation::event_type).collect();
        assert_eq!(kinds, vec!["status", "topic-depth", "topic-channel-depth"]);
        assert_matches!(
            &events[1],
            Observation::TopicDepth { topic, depth: 7, node, .. }
                if topic == "audit" && node.http_port == addr.port()
        );
        assert_matches!(
            &events[2],
            Observation::TopicChannelDepth { topic, channels, .. }
                if topic == "orders" && channels.get("billing") == Some(&3)
        );

        stop.cancel();
    }

    #[tokio::test]
    async fn test_run_signals_ready_once_then_streams_stats() {
        let (addr, stop) = fake_cluster().await;
        let observer = NsqClusterObserver::new(fake_cluster_config(addr)).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { observer.run(tx, shutdown).await })
        };

        let mut kinds = Vec::new();
        while kinds.len() < 10 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            kinds.push(event.event_type());
        }

        assert_eq!(&kinds[..4], &["ready", "status", "topic-depth", "topic-channel-depth"]);
        assert_eq!(kinds.iter().filter(|k| **k == "ready").count(), 1);
        assert!(!kinds.contains(&"error"));

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        stop.cancel();
    }
}
