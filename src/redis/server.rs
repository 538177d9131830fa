use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use super::config::ServerConfig;
use super::connection::{self, ConnectionContext};
use super::keyspace::Keyspace;
use super::rdb;
use super::repl_state::ReplicationState;
use super::replica_registry::ReplicaRegistry;
use super::replication;

pub struct RedisServer {
    config: Arc<ServerConfig>,
    keyspace: Arc<Keyspace>,
    replication_state: Arc<ReplicationState>,
    replica_registry: Arc<ReplicaRegistry>,
}

impl RedisServer {
    pub async fn bootstrap(config: ServerConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let keyspace = Arc::new(Keyspace::new());
        rdb::load_rdb_file(&config.rdb_path(), &keyspace).await?;

        let replication_state = Arc::new(match &config.replica_of {
            Some((host, port)) => ReplicationState::new_replica(host.clone(), *port),
            None => ReplicationState::new_primary(),
        });

        Ok(Self {
            config,
            keyspace,
            replication_state,
            replica_registry: Arc::new(ReplicaRegistry::new()),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .with_context(|| format!("failed to bind to port {}", self.config.port))?;

        log::info!(
            "redis server listening on port {} as {}",
            self.config.port,
            if self.config.is_replica() { "replica" } else { "primary" }
        );

        if self.config.is_replica() {
            let config = self.config.clone();
            let keyspace = self.keyspace.clone();
            let replication_state = self.replication_state.clone();
            tokio::spawn(async move {
                if let Err(err) = replication::run_replica_client(config, keyspace, replication_state).await {
                    log::error!("replication client exited with an error: {err}");
                    std::process::exit(1);
                }
            });
        }

        loop {
            let (stream, peer) = listener.accept().await?;
            let ctx = Arc::new(ConnectionContext {
                keyspace: self.keyspace.clone(),
                config: self.config.clone(),
                replication_state: self.replication_state.clone(),
                replica_registry: self.replica_registry.clone(),
            });

            tokio::spawn(async move {
                log::info!("client {peer} connected");
                connection::handle_connection(stream, peer, ctx).await;
                log::info!("client {peer} disconnected");
            });
        }
    }
}
