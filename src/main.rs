use std::sync::Arc;
use std::time::Duration;

use buildcache::config::Config;
use buildcache::http;
use buildcache::membership::service::MembershipService;
use buildcache::router::service::CacheRouter;
use buildcache::rpc;
use buildcache::store::disk::DiskStore;
use buildcache::store::eviction::spawn_eviction_loop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} --bind <addr:port> [--seed <addr:port>] [--data-dir <path>]", args[0]);
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000",
            args[0]
        );
        eprintln!("Tuning: --replicas N --high-watermark BYTES --low-watermark BYTES");
        eprintln!("        --rpc <addr:port> --http <addr:port>");

        std::process::exit(1);
    }

    let config = Config::from_args(&args)?;

    tracing::info!("Starting node on {}", config.gossip_addr);
    if !config.seed_nodes.is_empty() {
        tracing::info!("Seed nodes: {:?}", config.seed_nodes);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Local store:
    let store = DiskStore::open(&config.data_dir).await?;

    // 2. Membership (UDP gossip):
    let membership = MembershipService::new(&config).await?;
    tracing::info!("Node ID: {:?}", membership.local_node.id);

    // 3. Router over store + placement:
    let router = CacheRouter::new(store.clone(), membership.clone(), &config);

    // 4. Spawn membership service:
    let service_clone = membership.clone();
    tokio::spawn(async move {
        service_clone.start().await;
    });

    // 5. Background eviction:
    let _eviction = spawn_eviction_loop(
        store.clone(),
        config.high_watermark,
        config.low_watermark,
        config.eviction_interval,
    );

    // 6. RPC listener:
    let rpc_listener = tokio::net::TcpListener::bind(config.rpc_addr).await?;
    tracing::info!("RPC server listening on {}", config.rpc_addr);
    {
        let router = router.clone();
        tokio::spawn(async move {
            if let Err(e) = rpc::server::serve(rpc_listener, router).await {
                tracing::error!("RPC server exited: {}", e);
            }
        });
    }

    // 7. Spawn stats reporter:
    let stats_membership = membership.clone();
    let stats_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let view = stats_membership.current_view();
            tracing::info!(
                "Cluster stats: {} alive nodes (view gen {}), {} entries / {} bytes local",
                view.alive_count(),
                view.generation,
                stats_store.entry_count(),
                stats_store.occupied_bytes(),
            );
            for node in stats_membership.get_alive_members() {
                tracing::info!(
                    "  - {:?} gossip={} rpc={} http={} (inc={})",
                    node.id,
                    node.gossip_addr,
                    node.rpc_addr,
                    node.http_addr,
                    node.incarnation
                );
            }
        }
    });

    // 8. HTTP server:
    let app = http::handlers::app(Arc::clone(&router));

    tracing::info!("HTTP server listening on {}", config.http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
