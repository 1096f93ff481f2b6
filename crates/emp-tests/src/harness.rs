//! Multi-node test network over real sockets.
//!
//! Each node is a full `Node`: store, transport, engine, and sweeper.
//! Nodes listen on loopback with ephemeral ports; later nodes bootstrap
//! off earlier ones so the handshake cascade runs exactly as it would
//! in production.

use std::future::Future;
use std::time::Duration;

use emp_engine::{Node, NodeConfig, RegistryReceivers, SweeperConfig};
use emp_net::TransportConfig;
use emp_store::StoreConfig;
use tempfile::TempDir;
use tokio::time::sleep;
use tracing::info;

/// A test network of full nodes.
pub struct TestNetwork {
    nodes: Vec<TestNodeHandle>,
}

/// A running node plus its registrar streams and storage directory.
pub struct TestNodeHandle {
    /// The running node
    pub node: Node,
    /// Registrar streams
    pub registrations: RegistryReceivers,
    _dir: TempDir,
}

impl TestNetwork {
    /// Creates an empty test network.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Starts a node that bootstraps off every existing node.
    pub async fn add_node(&mut self) -> &TestNodeHandle {
        let dir = TempDir::new().expect("tempdir");
        let mut config = NodeConfig::new(StoreConfig::new(dir.path()));
        config.transport = TransportConfig {
            listen_addr: "127.0.0.1:0".parse().expect("valid literal"),
            ..TransportConfig::default()
        };
        // Keep the sweeper quiet during tests.
        config.sweeper = SweeperConfig {
            interval: Duration::from_secs(3600),
            retention: Duration::from_secs(3600),
        };
        config.bootstrap = self
            .nodes
            .iter()
            .map(|handle| handle.node.listen_addr())
            .collect();

        let (node, registrations) = Node::start(config).await.expect("node start");
        info!(addr = %node.listen_addr(), total = self.nodes.len() + 1, "Added node to test network");

        self.nodes.push(TestNodeHandle {
            node,
            registrations,
            _dir: dir,
        });
        self.nodes.last().expect("just pushed")
    }

    /// Returns a node by index.
    pub fn node(&self, index: usize) -> &TestNodeHandle {
        &self.nodes[index]
    }

    /// Mutable access to a node (for draining registrar streams).
    pub fn node_mut(&mut self, index: usize) -> &mut TestNodeHandle {
        &mut self.nodes[index]
    }

    /// Number of nodes in the network.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the network has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Shuts every node down.
    pub async fn shutdown(self) {
        for handle in self.nodes {
            handle.node.shutdown().await;
        }
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `cond` until it returns true or the deadline passes.
pub async fn wait_for<F, Fut>(mut cond: F, deadline: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let step = Duration::from_millis(25);
    let mut waited = Duration::ZERO;
    loop {
        if cond().await {
            return true;
        }
        if waited >= deadline {
            return false;
        }
        sleep(step).await;
        waited += step;
    }
}
