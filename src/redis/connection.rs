use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::config::ServerConfig;
use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::error::RedisError;
use super::keyspace::Keyspace;
use super::repl_state::ReplicationState;
use super::replica_registry::{ReplicaRegistry, ReplicaSink};
use super::resp::command::Request;
use super::resp::reader::FrameReader;

/// Shared, per-server state every connection needs a handle to.
pub struct ConnectionContext {
    pub keyspace: Arc<Keyspace>,
    pub config: Arc<ServerConfig>,
    pub replication_state: Arc<ReplicationState>,
    pub replica_registry: Arc<ReplicaRegistry>,
}

pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>) {
    if let Err(err) = run_connection(stream, peer, ctx).await {
        log::warn!("connection {peer} ended with an error: {err}");
    }
}

async fn run_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>) -> anyhow::Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new();
    let dispatcher = Dispatcher::new(
        ctx.keyspace.clone(),
        ctx.config.clone(),
        ctx.replication_state.clone(),
    );

    loop {
        let args = loop {
            if let Some(args) = reader.next_request()? {
                break args;
            }
            let n = read_half.read_buf(reader.buffer_mut()).await?;
            if n == 0 {
                return Ok(());
            }
        };

        let request = Request::new(args)?;
        let outcome = match dispatcher.dispatch(&request).await {
            Ok(outcome) => outcome,
            Err(err) => match err.downcast_ref::<RedisError>() {
                Some(redis_err) => DispatchOutcome {
                    response: Some(redis_err.to_resp()),
                    extra_bytes: None,
                    propagate: false,
                    promote_to_replica: false,
                },
                None => return Err(err),
            },
        };

        if let Some(response) = &outcome.response {
            write_half.write_all(&response.encode()).await?;
        }
        if let Some(extra) = &outcome.extra_bytes {
            write_half.write_all(extra).await?;
        }

        if outcome.propagate {
            if matches!(&*ctx.replication_state, ReplicationState::Primary { .. }) {
                ctx.replica_registry.propagate(request.encode()).await;
            }
        }

        if outcome.promote_to_replica {
            log::info!("connection {peer} promoted to a replica sink after PSYNC");
            return run_as_replica_sink(read_half, write_half, &ctx).await;
        }
    }
}

/// Once a connection completes `PSYNC`, it stops behaving like a normal
/// client: its write half is handed to the replica registry for fan-out,
/// and its read half is drained (and discarded) purely to detect when the
/// replica disconnects.
async fn run_as_replica_sink(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    ctx: &ConnectionContext,
) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel(128);
    ctx.replica_registry.attach(ReplicaSink::new(tx)).await;

    let writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut discard = [0u8; 1024];
    loop {
        match read_half.read(&mut discard).await {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }

    writer.abort();
    Ok(())
}
