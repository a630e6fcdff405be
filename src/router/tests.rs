//! Router Module Tests
//!
//! Validates routing decisions end to end: local serving, cross-node
//! forwarding over live RPC listeners, read-repair, replication, delete
//! fan-out, and single-flight de-duplication. Cluster tests register peers
//! directly instead of waiting on UDP gossip rounds, which keeps them
//! deterministic.

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::membership::service::MembershipService;
    use crate::membership::types::{Node, NodeId, NodeState};
    use crate::placement::ring;
    use crate::router::service::CacheRouter;
    use crate::router::singleflight::{FetchOutcome, SingleFlight};
    use crate::rpc::server;
    use crate::store::disk::DiskStore;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct TestNode {
        membership: Arc<MembershipService>,
        store: Arc<DiskStore>,
        router: Arc<CacheRouter>,
        rpc_addr: SocketAddr,
        _dir: tempfile::TempDir,
    }

    async fn start_node(replicas: usize) -> TestNode {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_bind("127.0.0.1:0".parse().unwrap());
        config.replication_factor = replicas;
        config.data_dir = dir.path().to_path_buf();
        config.forward_timeout = Duration::from_millis(1000);

        let membership = MembershipService::new(&config).await.unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let router = CacheRouter::new(store.clone(), membership.clone(), &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let rpc_addr = listener.local_addr().unwrap();
        let serve_router = router.clone();
        tokio::spawn(async move {
            let _ = server::serve(listener, serve_router).await;
        });

        TestNode {
            membership,
            store,
            router,
            rpc_addr,
            _dir: dir,
        }
    }

    /// Registers `peer` in `node`'s member table, the way converged gossip
    /// would have.
    fn link(node: &TestNode, peer: &TestNode) {
        let mut entry = peer.membership.local_node.clone();
        entry.rpc_addr = peer.rpc_addr;
        entry.state = NodeState::Alive;
        node.membership.add_peer(entry);
    }

    #[tokio::test]
    async fn test_solo_node_roundtrip() {
        let node = start_node(1).await;

        node.router.put_bytes("k", b"artifact bytes").await.unwrap();

        let blob = node.router.get("k").await.unwrap().expect("hit");
        assert_eq!(blob.read_to_bytes().await.unwrap(), b"artifact bytes");

        node.router.delete("k").await.unwrap();
        assert!(node.router.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_two_node_put_get_any_node() {
        let a = start_node(1).await;
        let b = start_node(1).await;
        link(&a, &b);
        link(&b, &a);

        // Written through A; with R=1 exactly one of the two owns it.
        a.router.put_bytes("foo", b"bar").await.unwrap();

        // Readable from both sides, whichever direction needs forwarding.
        let via_b = b.router.get("foo").await.unwrap().expect("hit via B");
        assert_eq!(via_b.read_to_bytes().await.unwrap(), b"bar");

        let via_a = a.router.get("foo").await.unwrap().expect("hit via A");
        assert_eq!(via_a.read_to_bytes().await.unwrap(), b"bar");

        // The blob lives only on its owner; the non-owner served and
        // discarded.
        let owners = ring::owners("foo", &a.membership.current_view(), 1);
        let owner_is_a = owners[0].id == a.membership.local_node.id;
        assert_eq!(a.store.contains("foo"), owner_is_a);
        assert_eq!(b.store.contains("foo"), !owner_is_a);
    }

    #[tokio::test]
    async fn test_read_repair_fills_missing_owner_copy() {
        let a = start_node(2).await;
        let b = start_node(2).await;
        link(&a, &b);
        link(&b, &a);

        // Seed only A's store, bypassing replication entirely.
        a.store.put_bytes("repair-me", b"payload").await.unwrap();
        assert!(!b.store.contains("repair-me"));

        // B owns the key too (R=2 over two nodes), so serving it repairs it.
        let blob = b.router.get("repair-me").await.unwrap().expect("hit");
        assert_eq!(blob.read_to_bytes().await.unwrap(), b"payload");
        assert!(b.store.contains("repair-me"), "owner copy self-healed");
    }

    #[tokio::test]
    async fn test_put_replicates_to_all_owners() {
        let a = start_node(2).await;
        let b = start_node(2).await;
        link(&a, &b);
        link(&b, &a);

        a.router.put_bytes("shared", b"replica data").await.unwrap();

        // The ack only covers the primary commit; give the background push a
        // moment to land.
        let mut replicated = false;
        for _ in 0..40 {
            if a.store.contains("shared") && b.store.contains("shared") {
                replicated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(replicated, "both owners should hold the blob eventually");

        let on_b = b.store.get("shared").await.unwrap().unwrap();
        assert_eq!(on_b.read_to_bytes().await.unwrap(), b"replica data");
    }

    #[tokio::test]
    async fn test_delete_fans_out_to_owners() {
        let a = start_node(2).await;
        let b = start_node(2).await;
        link(&a, &b);
        link(&b, &a);

        a.store.put_bytes("gone", b"x").await.unwrap();
        b.store.put_bytes("gone", b"x").await.unwrap();

        a.router.delete("gone").await.unwrap();
        assert!(!a.store.contains("gone"), "local removal is synchronous");

        let mut removed = false;
        for _ in 0..40 {
            if !b.store.contains("gone") {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(removed, "peer copy should be removed by the fan-out");
    }

    #[tokio::test]
    async fn test_unreachable_owner_yields_miss_not_error() {
        let a = start_node(1).await;

        // A peer that is in the view but whose listener is gone.
        let dead_port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let ghost = Node {
            id: NodeId("ghost-node".to_string()),
            gossip_addr: "127.0.0.1:1".parse().unwrap(),
            rpc_addr: dead_port,
            http_addr: "127.0.0.1:1".parse().unwrap(),
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: None,
        };
        a.membership.add_peer(ghost.clone());

        // Find a key the ghost owns so the lookup must go remote.
        let view = a.membership.current_view();
        let key = (0..1000)
            .map(|i| format!("k{}", i))
            .find(|k| ring::owners(k, &view, 1)[0].id == ghost.id)
            .expect("some key should land on the ghost");

        let result = a.router.get(&key).await.unwrap();
        assert!(result.is_none(), "unreachable owner degrades to a miss");
    }

    #[tokio::test]
    async fn test_dead_owner_excluded_so_surviving_replica_serves() {
        let a = start_node(2).await;
        let b = start_node(2).await;
        link(&a, &b);
        link(&b, &a);

        a.store.put_bytes("resilient", b"still here").await.unwrap();

        // B drops dead in A's view; A is now the only placeable owner.
        let mut dead_b = b.membership.local_node.clone();
        dead_b.rpc_addr = b.rpc_addr;
        dead_b.state = NodeState::Dead;
        dead_b.incarnation += 1;
        a.membership.merge_member(dead_b);

        let owners = ring::owners("resilient", &a.membership.current_view(), 2);
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].id, a.membership.local_node.id);

        let blob = a.router.get("resilient").await.unwrap().expect("hit");
        assert_eq!(blob.read_to_bytes().await.unwrap(), b"still here");
    }

    #[tokio::test]
    async fn test_single_flight_collapses_concurrent_fetches() {
        let flights = Arc::new(SingleFlight::new());
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let fetches = fetches.clone();
            tasks.push(tokio::spawn(async move {
                flights
                    .run("hot-key", || async {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        FetchOutcome::Miss
                    })
                    .await
            }));
        }

        for task in tasks {
            let outcome = task.await.unwrap();
            assert!(matches!(outcome, FetchOutcome::Miss));
        }

        assert_eq!(
            fetches.load(Ordering::SeqCst),
            1,
            "only the leader performs the fetch"
        );
        assert_eq!(flights.in_flight(), 0, "flight unregistered after landing");
    }

    #[tokio::test]
    async fn test_single_flight_distinct_keys_run_independently() {
        let flights = Arc::new(SingleFlight::new());
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for key in ["one", "two"] {
            let flights = flights.clone();
            let fetches = fetches.clone();
            tasks.push(tokio::spawn(async move {
                flights
                    .run(key, || async {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        FetchOutcome::Miss
                    })
                    .await
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
