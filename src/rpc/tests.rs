//! RPC Module Tests
//!
//! Validates the wire framing in isolation and the full client surface
//! against a live listener backed by a single-node router.

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::membership::service::MembershipService;
    use crate::router::service::CacheRouter;
    use crate::rpc::protocol::{
        CHUNK_SIZE, Request, Response, read_body_into_spool, read_frame, write_body, write_frame,
    };
    use crate::rpc::server;
    use crate::store::disk::DiskStore;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn solo_node() -> (Arc<CacheRouter>, SocketAddr, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_bind("127.0.0.1:0".parse().unwrap());
        config.replication_factor = 1;
        config.data_dir = dir.path().to_path_buf();

        let membership = MembershipService::new(&config).await.unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let router = CacheRouter::new(store, membership, &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serve_router = router.clone();
        tokio::spawn(async move {
            let _ = server::serve(listener, serve_router).await;
        });

        (router, addr, dir)
    }

    #[tokio::test]
    async fn test_header_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);

        let request = Request::Get {
            key: "abc123".to_string(),
        };
        write_frame(&mut a, &request).await.unwrap();

        let decoded: Request = read_frame(&mut b).await.unwrap();
        match decoded {
            Request::Get { key } => assert_eq!(key, "abc123"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_body_chunking_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();

        // Larger than one chunk so the split/reassemble path runs.
        let payload: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();

        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        let sender = {
            let payload = payload.clone();
            tokio::spawn(async move {
                let mut src: &[u8] = &payload;
                write_body(&mut a, &mut src).await.unwrap()
            })
        };

        let mut spool = store.spool().await.unwrap();
        let received = read_body_into_spool(&mut b, &mut spool).await.unwrap();
        let sent = sender.await.unwrap();

        assert_eq!(sent, payload.len() as u64);
        assert_eq!(received, payload.len() as u64);

        let mut contents = Vec::new();
        spool
            .reopen()
            .await
            .unwrap()
            .read_to_end(&mut contents)
            .await
            .unwrap();
        assert_eq!(contents, payload);
    }

    #[tokio::test]
    async fn test_live_put_get_delete_cycle() {
        let (router, addr, _dir) = solo_node().await;

        // Put
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut stream,
            &Request::Put {
                key: "artifact".to_string(),
            },
        )
        .await
        .unwrap();
        let mut src: &[u8] = b"cached build output";
        write_body(&mut stream, &mut src).await.unwrap();
        match read_frame::<_, Response>(&mut stream).await.unwrap() {
            Response::Done => {}
            other => panic!("put failed: {:?}", other),
        }
        assert!(router.store().contains("artifact"));

        // Get
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut stream,
            &Request::Get {
                key: "artifact".to_string(),
            },
        )
        .await
        .unwrap();
        match read_frame::<_, Response>(&mut stream).await.unwrap() {
            Response::Found { size } => {
                assert_eq!(size, 19);
                let mut spool = router.store().spool().await.unwrap();
                let received = read_body_into_spool(&mut stream, &mut spool).await.unwrap();
                assert_eq!(received, 19);

                let mut contents = Vec::new();
                spool
                    .reopen()
                    .await
                    .unwrap()
                    .read_to_end(&mut contents)
                    .await
                    .unwrap();
                assert_eq!(contents, b"cached build output");
            }
            other => panic!("get failed: {:?}", other),
        }

        // Delete, then the key is gone.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut stream,
            &Request::Delete {
                key: "artifact".to_string(),
            },
        )
        .await
        .unwrap();
        match read_frame::<_, Response>(&mut stream).await.unwrap() {
            Response::Done => {}
            other => panic!("delete failed: {:?}", other),
        }

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut stream,
            &Request::Get {
                key: "artifact".to_string(),
            },
        )
        .await
        .unwrap();
        match read_frame::<_, Response>(&mut stream).await.unwrap() {
            Response::NotFound => {}
            other => panic!("expected miss: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_miss_is_not_found_not_error() {
        let (_router, addr, _dir) = solo_node().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut stream,
            &Request::Get {
                key: "never-stored".to_string(),
            },
        )
        .await
        .unwrap();

        match read_frame::<_, Response>(&mut stream).await.unwrap() {
            Response::NotFound => {}
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
