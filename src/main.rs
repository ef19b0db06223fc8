use axum::{Router, extract::Extension, routing::post};
use memgrid::blackboard::ENDPOINT_BLACKBOARD;
use memgrid::blackboard::handlers::handle_blackboard;
use memgrid::blackboard::network::NetworkTransport;
use memgrid::blackboard::transport::Transport;
use memgrid::config::GridConfig;
use memgrid::global_memory::ENDPOINT_GLOBALMEM;
use memgrid::global_memory::handlers::handle_globalmem;
use memgrid::ipc::Supervisor;
use memgrid::jobs::JobFunctionRegistry;
use memgrid::membership::service::MembershipService;
use memgrid::netcheck::NetCheck;
use memgrid::node::Worker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!(
            "Usage: {} [--config <file>] [--bind <addr:port>] [--seed <addr:port>]... [--workers <n>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000",
            args[0]
        );
        std::process::exit(1);
    }

    let mut config_path: Option<String> = None;
    let mut bind_addr: Option<SocketAddr> = None;
    let mut seed_nodes: Vec<SocketAddr> = vec![];
    let mut workers: Option<usize> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config", Some(v)) => config_path = Some(v.clone()),
            ("--bind", Some(v)) => bind_addr = Some(v.parse()?),
            ("--seed", Some(v)) => seed_nodes.push(v.parse()?),
            ("--workers", Some(v)) => workers = Some(v.parse()?),
            (flag, _) => {
                tracing::warn!("Ignoring argument {}", flag);
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    let mut config = match &config_path {
        Some(path) => GridConfig::load(path)?,
        None => GridConfig::default(),
    };
    if let Some(bind) = bind_addr {
        // HTTP listens 1000 ports above gossip.
        config.node.gossip_addr = bind;
        config.node.http_addr = SocketAddr::new(bind.ip(), bind.port() + 1000);
    }
    config.node.seeds.extend(seed_nodes);
    if let Some(n) = workers {
        config.node.workers = n;
    }

    tracing::info!("Starting node on {}", config.node.gossip_addr);
    if !config.node.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", config.node.seeds);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Membership (UDP gossip):
    let membership = MembershipService::new(
        config.node.gossip_addr,
        config.node.http_addr,
        config.node.seeds.clone(),
    )
    .await?;
    tracing::info!("Node ID: {}", membership.local.id);

    // 2. Connectivity monitor:
    let netcheck = NetCheck::new();
    if let Some(host) = &config.netcheck.host {
        netcheck.start(host.clone(), Duration::from_millis(config.netcheck.frequency_ms));
    }

    // 3. Vertical cluster:
    let supervisor = Supervisor::new(membership.local.id.clone());
    let network: Arc<dyn Transport> = Arc::new(NetworkTransport::new(
        membership.clone(),
        config.blackboard.post_attempts,
    ));
    let registry = JobFunctionRegistry::new();
    let worker_count = config.node.worker_count();
    let workers: Vec<Arc<Worker>> = (0..worker_count)
        .map(|_| {
            Worker::spawn(
                &supervisor,
                Some(network.clone()),
                Some(netcheck.as_ref()),
                registry.clone(),
                &config,
            )
        })
        .collect();
    tracing::info!("Spawned {} worker(s)", workers.len());

    // 4. HTTP Router, up before the workers sync so peers can reach us:
    let front = workers[0].clone();
    let app = Router::new()
        .route(ENDPOINT_BLACKBOARD, post(handle_blackboard))
        .route(ENDPOINT_GLOBALMEM, post(handle_globalmem))
        .layer(Extension(supervisor.clone()))
        .layer(Extension(front.global_memory.clone()));

    let listener = tokio::net::TcpListener::bind(config.node.http_addr).await?;
    tracing::info!("HTTP server listening on {}", config.node.http_addr);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // 5. Spawn membership service:
    tokio::spawn(membership.clone().start());

    // 6. Initialise workers:
    for worker in &workers {
        worker.init().await?;
    }

    // 7. Spawn stats reporter:
    let stats_membership = membership.clone();
    let stats_supervisor = supervisor.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let peers = stats_membership.live_peers();
            tracing::info!(
                "Cluster stats: {} peer node(s), {} local worker(s), global memory {:?} with {} key(s), {} cluster key(s)",
                peers.len(),
                stats_supervisor.worker_count(),
                front.global_memory.state(),
                front.global_memory.len(),
                front.cluster_memory.len()
            );
            for peer in peers {
                tracing::info!("  - {} gossip={} http={}", peer.id, peer.gossip_addr, peer.http_addr);
            }
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::select! {
        result = server => result??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            membership.leave().await;
            for worker in &workers {
                worker.shutdown();
            }
        }
    }

    Ok(())
}
