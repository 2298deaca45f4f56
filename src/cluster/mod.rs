//! Cluster mode: consistent-hash routing and command relay between peers.
//!
//! A cluster node embeds a full standalone server for the keys it owns and
//! forwards everything else to the owning peer through a pooled, pipelined
//! client. Before the forwarded command, the relay sends `SELECT` so the
//! remote connection operates on the caller's database.

pub mod client;
pub mod pool;
pub mod ring;

pub use client::PeerClient;
pub use pool::{make_pool, PeerPool};
pub use ring::{ConsistentHashRing, DEFAULT_REPLICAS};

use crate::config::Properties;
use crate::connection::Connection;
use crate::db::{Server, StorageEngine};
use crate::protocol::RespValue;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use tracing::info;

type RouteFuture<'a> = Pin<Box<dyn Future<Output = RespValue> + Send + 'a>>;

/// A routing rule: decides where a command executes and returns its reply.
type RouterFn = for<'a> fn(&'a Cluster, &'a Connection, &'a [Bytes]) -> RouteFuture<'a>;

/// Commands routed to the peer owning the key in `argv[1]`.
const DEFAULT_ROUTED_COMMANDS: &[&str] = &[
    "expire", "ttl", "exists", "type", "set", "setnx", "setex", "get",
];

fn router_table() -> &'static HashMap<&'static str, RouterFn> {
    static TABLE: OnceLock<HashMap<&'static str, RouterFn>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: HashMap<&'static str, RouterFn> = HashMap::new();
        for name in DEFAULT_ROUTED_COMMANDS.iter().copied() {
            table.insert(name, default_route as RouterFn);
        }
        table
    })
}

/// Routes on `argv[1]`: pick the owning peer, relay, return its reply.
fn default_route<'a>(
    cluster: &'a Cluster,
    conn: &'a Connection,
    cmdline: &'a [Bytes],
) -> RouteFuture<'a> {
    Box::pin(async move {
        if cmdline.len() < 2 {
            // Let the local dispatcher produce the arity error.
            return cluster.relay(&cluster.self_addr, conn, cmdline).await;
        }
        let key = String::from_utf8_lossy(&cmdline[1]).into_owned();
        let Some(peer) = cluster.ring.pick_node(&key) else {
            return RespValue::error("peer connection not found");
        };
        let peer = peer.to_string();
        cluster.relay(&peer, conn, cmdline).await
    })
}

/// One node of the cluster: the local server plus routes to every peer.
pub struct Cluster {
    self_addr: String,
    nodes: Vec<String>,
    ring: ConsistentHashRing,
    peers: HashMap<String, PeerPool>,
    local: Server,
}

impl Cluster {
    /// Builds the node from its configuration: the ring covers the peers
    /// plus this node, and every peer gets a lazy connection pool.
    pub fn new(props: &Properties) -> anyhow::Result<Self> {
        let mut nodes = props.peers.clone();
        nodes.push(props.self_addr.clone());

        let mut ring = ConsistentHashRing::new(DEFAULT_REPLICAS, None);
        ring.add_nodes(&nodes);

        let mut peers = HashMap::new();
        for peer in &props.peers {
            peers.insert(peer.clone(), make_pool(peer)?);
        }

        info!(self_addr = %props.self_addr, peers = props.peers.len(), "cluster mode enabled");
        Ok(Self {
            self_addr: props.self_addr.clone(),
            nodes,
            ring,
            peers,
            local: Server::new(props.databases),
        })
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Executes `cmdline` on `peer`: locally when the peer is this node,
    /// otherwise through a pooled client, preceded by a `SELECT` matching
    /// the caller's database. The client returns to its pool either way.
    pub async fn relay(&self, peer: &str, conn: &Connection, cmdline: &[Bytes]) -> RespValue {
        if peer == self.self_addr {
            return self.local.exec_sync(conn, cmdline);
        }

        let Some(pool) = self.peers.get(peer) else {
            return RespValue::error("peer connection not found");
        };
        let peer_client = match pool.get().await {
            Err(err) => return RespValue::error(err.to_string()),
            Ok(peer_client) => peer_client,
        };

        let select = vec![
            Bytes::from_static(b"SELECT"),
            Bytes::from(conn.selected_db().to_string()),
        ];
        let select_reply = peer_client.send(select).await;
        if select_reply.is_error() {
            return select_reply;
        }
        peer_client.send(cmdline.to_vec()).await
    }

    /// Relays the command to every node and collects the per-node replies.
    pub async fn broadcast(
        &self,
        conn: &Connection,
        cmdline: &[Bytes],
    ) -> HashMap<String, RespValue> {
        let mut replies = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            replies.insert(node.clone(), self.relay(node, conn, cmdline).await);
        }
        replies
    }
}

#[async_trait]
impl StorageEngine for Cluster {
    async fn exec(&self, conn: &Connection, cmdline: &[Bytes]) -> RespValue {
        let Some(name_arg) = cmdline.first() else {
            return RespValue::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name_arg).to_lowercase();

        // SELECT mutates per-connection state and must run on this node,
        // both for direct clients and for the relay's SELECT prefix.
        if name == "select" {
            return self.local.exec_sync(conn, cmdline);
        }

        match router_table().get(name.as_str()) {
            None => RespValue::error("not supported command"),
            Some(route) => route(self, conn, cmdline).await,
        }
    }

    fn close(&self) {
        StorageEngine::close(&self.local);
    }

    fn after_client_close(&self, _conn: &Connection) {}
}
