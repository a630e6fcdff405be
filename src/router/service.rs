use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::singleflight::{FetchOutcome, SingleFlight};
use crate::config::Config;
use crate::membership::service::MembershipService;
use crate::membership::types::{Node, NodeId};
use crate::placement::ring;
use crate::rpc::client::PeerClient;
use crate::store::disk::DiskStore;
use crate::store::types::{Blob, Spool, StoreError};

#[derive(Debug, Error)]
pub enum PutError {
    #[error("local storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("write failed: {0}")]
    WriteFailed(String),
}

pub struct CacheRouter {
    store: Arc<DiskStore>,
    membership: Arc<MembershipService>,
    flights: SingleFlight,
    client: PeerClient,
    replication_factor: usize,
    replicate_attempts: usize,
    max_forward_hops: u32,
}

impl CacheRouter {
    pub fn new(
        store: Arc<DiskStore>,
        membership: Arc<MembershipService>,
        config: &Config,
    ) -> Arc<Self> {
        let client = PeerClient::new(config.forward_timeout, membership.local_node.id.clone());
        Arc::new(Self {
            store,
            membership,
            flights: SingleFlight::new(),
            client,
            replication_factor: config.replication_factor,
            replicate_attempts: config.replicate_attempts,
            max_forward_hops: config.max_forward_hops,
        })
    }

    pub fn store(&self) -> &Arc<DiskStore> {
        &self.store
    }

    pub fn membership(&self) -> &Arc<MembershipService> {
        &self.membership
    }

    pub fn local_node_id(&self) -> NodeId {
        self.membership.local_node.id.clone()
    }

    /// Client-facing read. Local store first when this node owns the key,
    /// then the replica set in order, one bounded attempt per owner. All
    /// owners missing or unreachable is a miss, never an error; only local
    /// disk trouble surfaces as `Err`.
    pub async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError> {
        let view = self.membership.current_view();
        let owners = ring::owners(key, &view, self.replication_factor);
        let local_id = self.local_node_id();
        // With nobody placeable the local store is all there is.
        let local_owner = owners.is_empty() || ring::is_owner(&local_id, &owners);

        if local_owner
            && let Some(blob) = self.store.get(key).await?
        {
            tracing::debug!("GET: local hit");
            return Ok(Some(blob));
        }

        let peers: Vec<Node> = owners
            .into_iter()
            .filter(|node| node.id != local_id)
            .collect();
        if peers.is_empty() {
            return Ok(None);
        }

        let outcome = self
            .flights
            .run(key, || self.fetch_from_peers(key, peers, local_owner))
            .await;

        match outcome {
            FetchOutcome::Stored => self.store.get(key).await,
            FetchOutcome::Spooled(spool) => Ok(Some(Blob::from_spool(spool).await?)),
            FetchOutcome::Miss => Ok(None),
        }
    }

    async fn fetch_from_peers(
        &self,
        key: &str,
        peers: Vec<Node>,
        repair_locally: bool,
    ) -> FetchOutcome {
        for peer in &peers {
            let mut spool = match self.store.spool().await {
                Ok(spool) => spool,
                Err(e) => {
                    tracing::error!("GET: failed to open spool: {}", e);
                    return FetchOutcome::Miss;
                }
            };

            match self
                .client
                .fetch(peer.rpc_addr, key, self.max_forward_hops, &mut spool)
                .await
            {
                Ok(Some(size)) => {
                    tracing::debug!("GET: fetched {} bytes from owner {:?}", size, peer.id);
                    self.membership.note_peer_activity(&peer.id);

                    if repair_locally {
                        // Read-repair: the transfer is already paid for, the
                        // commit itself is one rename.
                        return match self.store.commit(key, spool).await {
                            Ok(_) => FetchOutcome::Stored,
                            Err(e) => {
                                tracing::warn!("GET: read-repair commit failed: {}", e);
                                FetchOutcome::Miss
                            }
                        };
                    }
                    return FetchOutcome::Spooled(Arc::new(spool));
                }
                Ok(None) => {
                    tracing::debug!("GET: miss on owner {:?}", peer.id);
                    self.membership.note_peer_activity(&peer.id);
                }
                Err(e) => {
                    tracing::warn!("GET: fetch from {:?} failed: {}", peer.id, e);
                }
            }
        }

        FetchOutcome::Miss
    }

    /// Client-facing write. The ack covers the primary commit (local when
    /// this node owns the key, otherwise the first reachable owner);
    /// replication to the rest of the set happens in the background.
    pub async fn put(&self, key: &str, spool: Spool) -> Result<(), PutError> {
        if key.is_empty() {
            return Err(PutError::Store(StoreError::InvalidKey));
        }

        let view = self.membership.current_view();
        let owners = ring::owners(key, &view, self.replication_factor);
        let local_id = self.local_node_id();

        if owners.is_empty() {
            tracing::warn!("PUT: no placeable nodes, storing locally");
            self.store.commit(key, spool).await?;
            return Ok(());
        }

        if ring::is_owner(&local_id, &owners) {
            let size = self.store.commit(key, spool).await?;
            tracing::debug!("PUT: committed {} bytes locally as owner", size);
            self.spawn_replication(key, owners);
            return Ok(());
        }

        // Not an owner: hand the blob to the replica set, primary first. One
        // bounded attempt per owner; the recipient drives replication.
        let mut last_error = String::from("no owners reachable");
        for owner in &owners {
            match self.push_spool_to(owner, key, self.max_forward_hops, &spool).await {
                Ok(()) => {
                    self.membership.note_peer_activity(&owner.id);
                    tracing::debug!("PUT: forwarded to owner {:?}", owner.id);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("PUT: forward to {:?} failed: {}", owner.id, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(PutError::WriteFailed(last_error))
    }

    /// Client-facing delete. Local removal plus best-effort fan-out to every
    /// other owner; always acks (idempotent).
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(key).await?;

        let view = self.membership.current_view();
        let owners = ring::owners(key, &view, self.replication_factor);
        let local_id = self.local_node_id();
        let peers: Vec<Node> = owners
            .into_iter()
            .filter(|node| node.id != local_id)
            .collect();

        if !peers.is_empty() {
            let client = self.client.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                for peer in peers {
                    if let Err(e) = client.delete(peer.rpc_addr, &key).await {
                        tracing::warn!("DELETE: fan-out to {:?} failed: {}", peer.id, e);
                    }
                }
            });
        }

        Ok(())
    }

    /// Peer-facing read. Serves the local store; when this node's view says
    /// it is not an owner (divergent views) the request is chased one more
    /// hop, bounded by `hops`.
    pub async fn forward_get(&self, key: &str, hops: u32) -> Result<Option<Blob>, StoreError> {
        if let Some(blob) = self.store.get(key).await? {
            return Ok(Some(blob));
        }
        if hops == 0 {
            return Ok(None);
        }

        let view = self.membership.current_view();
        let owners = ring::owners(key, &view, self.replication_factor);
        let local_id = self.local_node_id();
        if owners.is_empty() || ring::is_owner(&local_id, &owners) {
            // We are an owner and genuinely miss; the originator walks the
            // remaining replicas itself.
            return Ok(None);
        }

        for owner in owners.iter().filter(|node| node.id != local_id) {
            let mut spool = self.store.spool().await?;
            match self.client.fetch(owner.rpc_addr, key, hops - 1, &mut spool).await {
                Ok(Some(_)) => return Ok(Some(Blob::from_spool(Arc::new(spool)).await?)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("ForwardGet: chase to {:?} failed: {}", owner.id, e);
                }
            }
        }

        Ok(None)
    }

    /// Peer-facing write. Commits locally when this node is an owner (or the
    /// hop budget is spent); a primary commit also kicks off replication to
    /// the remaining owners. Replication pushes arrive with `hops == 0` and
    /// stay strictly local.
    pub async fn forward_put(&self, key: &str, hops: u32, spool: Spool) -> Result<(), PutError> {
        if key.is_empty() {
            return Err(PutError::Store(StoreError::InvalidKey));
        }

        let view = self.membership.current_view();
        let owners = ring::owners(key, &view, self.replication_factor);
        let local_id = self.local_node_id();

        if hops > 0 && !owners.is_empty() && !ring::is_owner(&local_id, &owners) {
            // Divergent views put this key elsewhere; pass it along with a
            // smaller budget before falling back to a local commit.
            for owner in owners.iter().filter(|node| node.id != local_id) {
                match self.push_spool_to(owner, key, hops - 1, &spool).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!("ForwardPut: re-forward to {:?} failed: {}", owner.id, e);
                    }
                }
            }
            tracing::warn!("ForwardPut: no owner reachable, committing locally");
        }

        self.store.commit(key, spool).await?;
        if hops > 0 {
            self.spawn_replication(key, owners);
        }
        Ok(())
    }

    /// Peer-facing delete: strictly local.
    pub async fn forward_delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(key).await
    }

    /// Test/tooling convenience for small values.
    pub async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), PutError> {
        let mut spool = self.store.spool().await.map_err(PutError::Store)?;
        spool.write_chunk(bytes).await.map_err(PutError::Store)?;
        self.put(key, spool).await
    }

    async fn push_spool_to(
        &self,
        owner: &Node,
        key: &str,
        hops: u32,
        spool: &Spool,
    ) -> anyhow::Result<()> {
        let mut reader = spool.reopen().await?;
        self.client.push(owner.rpc_addr, key, hops, &mut reader).await
    }

    /// Fire-and-forget replication of a committed key to the other owners.
    /// Failures are retried with backoff up to the configured budget and then
    /// logged; they never surface to the writer.
    fn spawn_replication(&self, key: &str, owners: Vec<Node>) {
        let local_id = self.local_node_id();
        let backups: Vec<Node> = owners
            .into_iter()
            .filter(|node| node.id != local_id)
            .collect();
        if backups.is_empty() {
            return;
        }

        let store = self.store.clone();
        let client = self.client.clone();
        let attempts = self.replicate_attempts;
        let key = key.to_string();

        tokio::spawn(async move {
            for backup in backups {
                replicate_to_backup(&store, &client, &key, &backup, attempts).await;
            }
        });
    }
}

async fn replicate_to_backup(
    store: &Arc<DiskStore>,
    client: &PeerClient,
    key: &str,
    backup: &Node,
    attempts: usize,
) {
    let mut delay_ms = 150u64;

    for attempt in 0..attempts {
        let result = async {
            // Re-open per attempt; the pin keeps the entry from being
            // evicted mid-push.
            let Some(blob) = store.get(key).await? else {
                // Deleted or evicted since the commit; nothing left to push.
                return anyhow::Ok(false);
            };
            let (_, mut file, _hold) = blob.into_parts();
            client.push(backup.rpc_addr, key, 0, &mut file).await?;
            anyhow::Ok(true)
        }
        .await;

        match result {
            Ok(pushed) => {
                if pushed {
                    tracing::debug!("Replicated to backup {:?}", backup.id);
                }
                return;
            }
            Err(e) => {
                if attempt + 1 == attempts {
                    tracing::warn!("Replication to {:?} gave up: {}", backup.id, e);
                    return;
                }
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(1200);
            }
        }
    }
}
