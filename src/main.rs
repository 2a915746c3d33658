use {
  clap::Parser,
  oracle_node::{
    chain::{AbiDirectory, ChainClient, EthersChainClient},
    config::Config,
    gossip, ingress, registry, scheduler,
    runtime::{Runtime, SchedulerHandle},
    store::{SledStore, Store},
  },
  std::{net::SocketAddr, sync::Arc},
  tracing::info,
  tracing_subscriber::{prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt},
};

fn init_tracing() {
  tracing_subscriber::registry()
    .with(tracing_subscriber::EnvFilter::from_default_env())
    .with(tracing_subscriber::fmt::layer())
    .init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
  let config = Config::parse();
  config.validate()?;
  init_tracing();

  info!(version = env!("CARGO_PKG_VERSION"), "starting oracle node");
  info!(node = %config.node_address, "node identity");

  let abi_dir = AbiDirectory::new(config.expanded_abi_dir());
  let chain: Arc<dyn ChainClient> = Arc::new(
    EthersChainClient::new(config.chain_rpc_url.clone(), &config.node_private_key, abi_dir)
      .await?,
  );
  let store: Arc<dyn Store> = Arc::new(SledStore::open(&config.data_dir)?);

  let (gossip_handle, gossip_rx) = gossip::channel();
  let (job_tx, job_rx) = tokio::sync::mpsc::channel(1024);
  let scheduler_handle = SchedulerHandle::new(job_tx);

  let own_address = config.node_address;
  let peer_ws_port = config.peer_ws_port;
  let http_port = config.http_port;

  let runtime = Arc::new(Runtime::new(
    config,
    own_address,
    store,
    chain,
    gossip_handle,
    scheduler_handle,
  ));

  gossip::spawn(own_address, peer_ws_port, gossip_rx, runtime.clone());

  registry::boot(&runtime).await?;
  scheduler::spawn(runtime.clone(), job_rx);

  let app = ingress::router(runtime.clone());
  let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
  info!(%addr, "http vote ingress listening");

  axum::Server::bind(&addr)
    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  Ok(())
}

async fn shutdown_signal() {
  let _ = tokio::signal::ctrl_c().await;
  info!("shutdown signal received");
}
