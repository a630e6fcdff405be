//! HTTP Adapter Tests
//!
//! Drives the axum surface over a live listener with a plain HTTP client,
//! verifying the adapter exposes exactly the router's semantics.

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::http::handlers::{self, HOP_HEADER, StatusResponse};
    use crate::membership::service::MembershipService;
    use crate::router::service::CacheRouter;
    use crate::store::disk::DiskStore;
    use std::sync::Arc;

    async fn start_http_node() -> (String, Arc<CacheRouter>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_bind("127.0.0.1:0".parse().unwrap());
        config.replication_factor = 1;
        config.data_dir = dir.path().to_path_buf();

        let membership = MembershipService::new(&config).await.unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let router = CacheRouter::new(store, membership, &config);

        let app = handlers::app(router.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), router, dir)
    }

    #[tokio::test]
    async fn test_put_get_delete_cycle() {
        let (base, _router, _dir) = start_http_node().await;
        let client = reqwest::Client::new();

        let put = client
            .post(format!("{}/abc123", base))
            .body("artifact body".as_bytes().to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(put.status(), reqwest::StatusCode::CREATED);

        let get = client.get(format!("{}/abc123", base)).send().await.unwrap();
        assert_eq!(get.status(), reqwest::StatusCode::OK);
        assert_eq!(
            get.headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok()),
            Some("13")
        );
        assert_eq!(get.bytes().await.unwrap().as_ref(), b"artifact body");

        let del = client
            .delete(format!("{}/abc123", base))
            .send()
            .await
            .unwrap();
        assert_eq!(del.status(), reqwest::StatusCode::NO_CONTENT);

        let after = client.get(format!("{}/abc123", base)).send().await.unwrap();
        assert_eq!(after.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_miss_is_404() {
        let (base, _router, _dir) = start_http_node().await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{}/not-cached", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_key() {
        let (base, _router, _dir) = start_http_node().await;
        let client = reqwest::Client::new();

        for body in ["first", "second"] {
            let put = client
                .post(format!("{}/k", base))
                .body(body.as_bytes().to_vec())
                .send()
                .await
                .unwrap();
            assert_eq!(put.status(), reqwest::StatusCode::CREATED);
        }

        let get = client.get(format!("{}/k", base)).send().await.unwrap();
        assert_eq!(get.bytes().await.unwrap().as_ref(), b"second");
    }

    #[tokio::test]
    async fn test_status_reports_node_and_store() {
        let (base, router, _dir) = start_http_node().await;
        let client = reqwest::Client::new();

        router.put_bytes("seen", b"123456").await.unwrap();

        let status: StatusResponse = client
            .get(format!("{}/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(status.node_id, router.local_node_id().0);
        assert_eq!(status.alive_members, 1);
        assert_eq!(status.entry_count, 1);
        assert_eq!(status.occupied_bytes, 6);
    }

    #[tokio::test]
    async fn test_internal_routes_serve_local_only() {
        let (base, router, _dir) = start_http_node().await;
        let client = reqwest::Client::new();

        // Internal put lands in the local store.
        let put = client
            .post(format!("{}/internal/put/peer-key", base))
            .header(HOP_HEADER, "0")
            .body("pushed by a peer".as_bytes().to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(put.status(), reqwest::StatusCode::OK);
        assert!(router.store().contains("peer-key"));

        // Internal get serves it back.
        let get = client
            .get(format!("{}/internal/get/peer-key", base))
            .header(HOP_HEADER, "0")
            .send()
            .await
            .unwrap();
        assert_eq!(get.status(), reqwest::StatusCode::OK);
        assert_eq!(get.bytes().await.unwrap().as_ref(), b"pushed by a peer");

        // Internal delete is local and idempotent.
        let del = client
            .delete(format!("{}/internal/delete/peer-key", base))
            .send()
            .await
            .unwrap();
        assert_eq!(del.status(), reqwest::StatusCode::OK);
        assert!(!router.store().contains("peer-key"));

        let miss = client
            .get(format!("{}/internal/get/peer-key", base))
            .send()
            .await
            .unwrap();
        assert_eq!(miss.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
