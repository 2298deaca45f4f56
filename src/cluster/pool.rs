//! Bounded pools of peer clients.
//!
//! One managed pool per peer address: borrowing opens a fresh client on a
//! miss and reuses an idle one otherwise, recycling only checks the client
//! still reports running, and discarded clients close when dropped.

use crate::cluster::client::PeerClient;
use async_trait::async_trait;
use deadpool::managed::{Manager, Pool, RecycleError, RecycleResult};

/// Maximum clients kept per peer.
const POOL_MAX_SIZE: usize = 16;

/// Creates peer clients for one address.
pub struct PeerClientFactory {
    addr: String,
}

#[async_trait]
impl Manager for PeerClientFactory {
    type Type = PeerClient;
    type Error = std::io::Error;

    async fn create(&self) -> Result<PeerClient, Self::Error> {
        PeerClient::connect(&self.addr).await
    }

    async fn recycle(&self, client: &mut PeerClient) -> RecycleResult<Self::Error> {
        if client.is_running() {
            Ok(())
        } else {
            Err(RecycleError::Message("client closed".to_string()))
        }
    }
}

/// A bounded pool of pipelined clients for one peer.
pub type PeerPool = Pool<PeerClientFactory>;

/// Builds the pool for `addr`. Connections are opened lazily on first
/// borrow.
pub fn make_pool(addr: &str) -> anyhow::Result<PeerPool> {
    let factory = PeerClientFactory {
        addr: addr.to_string(),
    };
    Pool::builder(factory)
        .max_size(POOL_MAX_SIZE)
        .build()
        .map_err(|err| anyhow::anyhow!("building pool for {}: {}", addr, err))
}
