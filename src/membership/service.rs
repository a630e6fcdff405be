use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, watch};
use tracing::info;

use super::types::{GossipMessage, MembershipView, Node, NodeId, NodeState};
use crate::config::Config;

pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
    generation: AtomicU64,
    view_tx: watch::Sender<MembershipView>,
    heartbeat_interval: Duration,
    failure_check_interval: Duration,
    suspect_timeout: Duration,
    dead_timeout: Duration,
}

impl MembershipService {
    pub async fn new(config: &Config) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(config.gossip_addr).await?;
        // The configured address may carry port 0; advertise what we actually bound.
        let gossip_addr = socket.local_addr()?;
        let incarnation_counter = Arc::new(RwLock::new(1));
        let current_inc = *incarnation_counter.read().await;
        let local_node = Node {
            id: NodeId::new(),
            gossip_addr,
            rpc_addr: config.rpc_addr,
            http_addr: config.http_addr,
            state: NodeState::Alive,
            incarnation: current_inc,
            last_seen: Some(Instant::now()),
        };
        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        let initial_view = MembershipView {
            generation: 1,
            nodes: vec![local_node.clone()],
        };
        let (view_tx, _view_rx) = watch::channel(initial_view);

        if !config.seed_nodes.is_empty() {
            info!("Joining cluster via {} seed node(s)", config.seed_nodes.len());

            for seed_node in config.seed_nodes.iter() {
                let msg = GossipMessage::Join {
                    node: local_node.clone(),
                };

                let encoded = bincode::serialize(&msg)?;
                socket.send_to(&encoded, seed_node).await?;
                info!("Sent join request to {}", seed_node);
            }
        }

        Ok(Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            incarnation: incarnation_counter,
            generation: AtomicU64::new(1),
            view_tx,
            heartbeat_interval: config.heartbeat_interval,
            failure_check_interval: config.heartbeat_interval.max(Duration::from_millis(250)),
            suspect_timeout: config.suspect_timeout,
            dead_timeout: config.dead_timeout,
        }))
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service...");

        let _gossip_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.gossip_loop().await;
            })
        };

        let _receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop().await;
            })
        };

        let _failure_detection_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.failure_detection_loop().await;
            })
        };

        tracing::info!("All background tasks started");
    }

    /// Snapshot of the locally believed topology. Never blocks on the gossip
    /// loops; readers see the last published view.
    pub fn current_view(&self) -> MembershipView {
        self.view_tx.borrow().clone()
    }

    /// Subscribe to view changes. Every accepted join/health transition
    /// publishes a fresh snapshot.
    pub fn watch_view(&self) -> watch::Receiver<MembershipView> {
        self.view_tx.subscribe()
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Statically registers a peer, as if it had joined via gossip. Used by
    /// deployments that prefer fixed peer lists over seed discovery, and by
    /// tests that assemble a cluster without live UDP exchange.
    pub fn add_peer(&self, mut node: Node) {
        node.last_seen = Some(Instant::now());
        self.members.insert(node.id.clone(), node);
        self.publish_view();
    }

    /// A verified message from a peer arrived through some transport path.
    /// Any non-alive state is reversed; a dead tombstone becomes a re-join.
    pub fn note_peer_activity(&self, id: &NodeId) {
        let mut changed = false;
        if let Some(mut member) = self.members.get_mut(id) {
            member.last_seen = Some(Instant::now());
            if member.state != NodeState::Alive {
                tracing::info!("Node {:?} proved alive via transport traffic", id);
                member.state = NodeState::Alive;
                changed = true;
            }
        }
        if changed {
            self.publish_view();
        }
    }

    /// Rebuilds and publishes the view snapshot under the next generation.
    fn publish_view(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut nodes: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        self.view_tx.send_replace(MembershipView { generation, nodes });
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.heartbeat_interval);

        loop {
            interval.tick().await;

            // Suspects are pinged too: a successful round is what clears them.
            let targets: Vec<Node> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.value().id != self.local_node.id
                        && entry.value().state != NodeState::Dead
                })
                .map(|entry| entry.value().clone())
                .collect();

            if targets.is_empty() {
                continue;
            }

            use rand::Rng;
            let idx = rand::thread_rng().gen_range(0..targets.len());
            let target = &targets[idx];

            let incarnation = *self.incarnation.read().await;
            let mut from = self.local_node.clone();
            from.incarnation = incarnation;
            let msg = GossipMessage::Ping { from };

            if let Ok(encoded) = bincode::serialize(&msg) {
                if let Err(e) = self.socket.send_to(&encoded, target.gossip_addr).await {
                    tracing::warn!("Failed to send ping to {:?}: {}", target.id, e);
                } else {
                    tracing::debug!("Sent ping to {:?}", target.id);
                }
            } else {
                tracing::error!("Failed to serialize GossipMessage::Ping");
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: GossipMessage) -> Result<()> {
        match msg {
            GossipMessage::Ping { from } => {
                self.handle_ping(from).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members).await?;
            }

            GossipMessage::Join { node } => {
                self.handle_join(node).await?;
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await?;
            }

            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation).await?;
            }
        }

        Ok(())
    }

    async fn handle_ping(&self, from: Node) -> Result<()> {
        tracing::debug!("Received ping from {:?}", from.id);

        let reply_addr = from.gossip_addr;
        let mut changed = false;

        if let Some(mut member) = self.members.get_mut(&from.id) {
            member.last_seen = Some(Instant::now());

            if from.incarnation > member.incarnation {
                member.incarnation = from.incarnation;
            }
            // A ping is direct proof of life, tombstone or not.
            if member.state != NodeState::Alive {
                member.state = NodeState::Alive;
                changed = true;
            }
        } else {
            tracing::info!("Discovered new member via ping: {:?} at {}", from.id, reply_addr);

            let mut new_node = from.clone();
            new_node.state = NodeState::Alive;
            new_node.last_seen = Some(Instant::now());

            self.members.insert(new_node.id.clone(), new_node);
            changed = true;
        }

        if changed {
            self.publish_view();
        }

        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let my_incarnation = *self.incarnation.read().await;
        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: my_incarnation,
            members: all_members,
        };

        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, reply_addr).await?;

        tracing::debug!("Sent ack to {:?} with {} members", from.id, self.members.len());

        Ok(())
    }

    async fn handle_ack(
        &self,
        from: NodeId,
        from_incarnation: u64,
        members: Vec<Node>,
    ) -> Result<()> {
        tracing::debug!(
            "Received ack from {:?} (inc={}) with {} members",
            from,
            from_incarnation,
            members.len()
        );

        if let Some(mut member) = self.members.get_mut(&from) {
            member.last_seen = Some(Instant::now());
            if from_incarnation > member.incarnation {
                member.incarnation = from_incarnation;
            }
            if member.state != NodeState::Alive {
                member.state = NodeState::Alive;
                drop(member);
                self.publish_view();
            }
        }

        for member in members {
            self.merge_member(member);
        }

        Ok(())
    }

    pub(crate) fn merge_member(&self, new_member: Node) {
        if new_member.id == self.local_node.id {
            return;
        }

        let mut changed = false;

        match self.members.get_mut(&new_member.id) {
            Some(mut existing) => {
                if new_member.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {:?}: inc {} -> {}",
                        new_member.id,
                        existing.incarnation,
                        new_member.incarnation,
                    );

                    changed = existing.state != new_member.state;
                    existing.state = new_member.state;
                    existing.incarnation = new_member.incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if new_member.incarnation == existing.incarnation {
                    // Equal incarnations: Dead wins, Alive refutes Suspect.
                    if new_member.state == NodeState::Dead && existing.state != NodeState::Dead {
                        tracing::info!("{:?} reported dead by peer", new_member.id);
                        existing.state = NodeState::Dead;
                        changed = true;
                    } else if new_member.state == NodeState::Alive
                        && existing.state == NodeState::Suspect
                    {
                        tracing::info!("{:?} refuted suspicion", new_member.id);
                        existing.state = NodeState::Alive;
                        existing.last_seen = Some(Instant::now());
                        changed = true;
                    }
                }
            }
            None => {
                tracing::info!(
                    "Discovered new member: {:?} at {}",
                    new_member.id,
                    new_member.gossip_addr
                );

                let mut member_with_timestamp = new_member;
                member_with_timestamp.last_seen = Some(Instant::now());

                self.members
                    .insert(member_with_timestamp.id.clone(), member_with_timestamp);
                changed = true;
            }
        }

        if changed {
            self.publish_view();
        }
    }

    pub(crate) async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) -> Result<()> {
        if node_id == self.local_node.id {
            // Someone suspects us. Refute by bumping our incarnation and
            // broadcasting proof of life.
            let my_incarnation = {
                let mut inc = self.incarnation.write().await;
                *inc += 1;
                *inc
            };
            tracing::info!("Refuting suspicion about ourselves (inc={})", my_incarnation);

            if let Some(mut me) = self.members.get_mut(&node_id) {
                me.incarnation = my_incarnation;
                me.state = NodeState::Alive;
                me.last_seen = Some(Instant::now());
            }

            let msg = GossipMessage::Alive {
                node_id,
                incarnation: my_incarnation,
            };
            self.broadcast_message(msg).await;

            return Ok(());
        }

        let mut changed = false;
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive {
                    tracing::info!(
                        "Node {:?} at {} suspected",
                        existing.id,
                        existing.gossip_addr
                    );
                    existing.state = NodeState::Suspect;
                    existing.incarnation = incarnation;
                    changed = true;
                }
            }
            None => {
                tracing::debug!("Suspected node {:?} doesn't exist", node_id);
            }
        }

        if changed {
            self.publish_view();
        }

        Ok(())
    }

    pub(crate) async fn handle_alive(&self, node_id: NodeId, incarnation: u64) -> Result<()> {
        let mut changed = false;
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation {
                    tracing::info!(
                        "Node {:?} at {} is now Alive (inc={})",
                        existing.id,
                        existing.gossip_addr,
                        incarnation
                    );
                    changed = existing.state != NodeState::Alive;
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if incarnation == existing.incarnation
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!(
                        "Node {:?} at {} successfully refuted suspicion",
                        existing.id,
                        existing.gossip_addr,
                    );
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                    changed = true;
                }
            }
            None => {
                tracing::debug!("Alive message for unknown node {:?}", node_id);
            }
        }

        if changed {
            self.publish_view();
        }

        Ok(())
    }

    async fn handle_join(&self, mut node: Node) -> Result<()> {
        tracing::info!("Node {:?} joining cluster at {}", node.id, node.gossip_addr);

        let reply_addr = node.gossip_addr;
        node.state = NodeState::Alive;
        node.last_seen = Some(Instant::now());

        // Upsert: a re-join of a tombstoned node is the same operation.
        self.members.insert(node.id.clone(), node);
        self.publish_view();

        tracing::info!("Cluster size now: {}", self.members.len());

        // Hand the joiner our member list right away instead of waiting for
        // the next gossip round to reach it.
        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let my_incarnation = *self.incarnation.read().await;
        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: my_incarnation,
            members: all_members,
        };
        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, reply_addr).await?;

        Ok(())
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.failure_check_interval);

        loop {
            interval.tick().await;
            let now = Instant::now();

            let mut messages_to_broadcast = Vec::new();
            let mut changed = false;

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();

                if member.id == self.local_node.id {
                    continue;
                }

                if let Some(last_seen) = member.last_seen {
                    let elapsed = now.duration_since(last_seen);

                    match member.state {
                        NodeState::Alive => {
                            if elapsed > self.suspect_timeout {
                                tracing::warn!(
                                    "Node {:?} suspected (no contact for {:?})",
                                    member.id,
                                    elapsed
                                );

                                member.state = NodeState::Suspect;
                                changed = true;

                                let msg = GossipMessage::Suspect {
                                    node_id: member.id.clone(),
                                    incarnation: member.incarnation,
                                };

                                messages_to_broadcast.push(msg);
                            }
                        }

                        NodeState::Suspect => {
                            if elapsed > self.dead_timeout {
                                tracing::warn!(
                                    "Node {:?} declared DEAD (no contact for {:?})",
                                    member.id,
                                    elapsed
                                );

                                member.state = NodeState::Dead;
                                changed = true;
                            }
                        }

                        NodeState::Dead => {
                            // Tombstone; stays until the node re-joins.
                        }
                    }
                } else {
                    member.last_seen = Some(now);
                }
            }

            if changed {
                self.publish_view();
                tracing::info!(
                    "Cluster size now: {} alive nodes",
                    self.get_alive_members().len()
                );
            }

            for msg in messages_to_broadcast {
                self.broadcast_message(msg).await;
            }
        }
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        if let Ok(encoded) = bincode::serialize(&msg) {
            for entry in self.members.iter() {
                let member = entry.value();

                if member.id == self.local_node.id {
                    continue;
                }

                if member.state != NodeState::Dead
                    && let Err(e) = self.socket.send_to(&encoded, member.gossip_addr).await
                {
                    tracing::warn!("Failed to broadcast to {:?}: {}", member.id, e);
                }
            }
        }
    }
}
