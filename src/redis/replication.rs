use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::config::ServerConfig;
use super::dispatcher::Dispatcher;
use super::keyspace::Keyspace;
use super::rdb;
use super::repl_state::ReplicationState;
use super::resp::command::Request;
use super::resp::reader::FrameReader;
use super::resp::{encode_args, RespValue};

/// Connects to the configured primary, completes the four-step handshake,
/// loads the snapshot it sends back, and then applies the continuous
/// command stream that follows until the connection closes.
pub async fn run_replica_client(
    config: Arc<ServerConfig>,
    keyspace: Arc<Keyspace>,
    replication_state: Arc<ReplicationState>,
) -> anyhow::Result<()> {
    let (host, port) = config
        .replica_of
        .clone()
        .expect("run_replica_client requires --replicaof to be set");

    log::info!("connecting to primary at {host}:{port}");
    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .with_context(|| format!("failed to connect to primary at {host}:{port}"))?;
    let (mut read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new();

    send_and_expect(&mut reader, &mut read_half, &mut write_half, &[b"PING"], b"PONG").await?;
    send_and_expect(
        &mut reader,
        &mut read_half,
        &mut write_half,
        &[b"REPLCONF", b"listening-port", config.port.to_string().as_bytes()],
        b"OK",
    )
    .await?;
    send_and_expect(
        &mut reader,
        &mut read_half,
        &mut write_half,
        &[b"REPLCONF", b"capa", b"psync2"],
        b"OK",
    )
    .await?;

    write_half
        .write_all(&encode_args(&[Bytes::from_static(b"PSYNC"), Bytes::from_static(b"?"), Bytes::from_static(b"-1")]))
        .await?;
    let value = read_value(&mut reader, &mut read_half).await?;
    let RespValue::SimpleString(text) = value else {
        anyhow::bail!("expected a FULLRESYNC reply to PSYNC, got {value:?}");
    };
    let text = String::from_utf8_lossy(&text).into_owned();
    anyhow::ensure!(text.starts_with("FULLRESYNC "), "expected a FULLRESYNC reply to PSYNC, got '{text}'");
    log::info!("replica completed the PSYNC handshake: {text}");

    let snapshot = read_snapshot(&mut reader, &mut read_half).await?;
    if let Err(err) = rdb::load_rdb_bytes(&snapshot, &keyspace).await {
        log::warn!("replica snapshot failed to load: {err}; continuing with an empty keyspace");
    }

    let dispatcher = Dispatcher::new(keyspace, config, replication_state.clone());
    stream_commands(reader, read_half, write_half, dispatcher, replication_state).await
}

async fn send_and_expect(
    reader: &mut FrameReader,
    read_half: &mut OwnedReadHalf,
    write_half: &mut OwnedWriteHalf,
    args: &[&[u8]],
    expected: &[u8],
) -> anyhow::Result<()> {
    let args: Vec<Bytes> = args.iter().map(|a| Bytes::copy_from_slice(a)).collect();
    write_half.write_all(&encode_args(&args)).await?;

    match read_value(reader, read_half).await? {
        RespValue::SimpleString(s) if s == expected => Ok(()),
        other => anyhow::bail!("unexpected reply during replication handshake: {other:?}"),
    }
}

async fn read_value(reader: &mut FrameReader, read_half: &mut OwnedReadHalf) -> anyhow::Result<RespValue> {
    loop {
        if let Some(value) = reader.next_value()? {
            return Ok(value);
        }
        let n = read_half.read_buf(reader.buffer_mut()).await?;
        anyhow::ensure!(n != 0, "primary closed the connection during the replication handshake");
    }
}

async fn read_snapshot(reader: &mut FrameReader, read_half: &mut OwnedReadHalf) -> anyhow::Result<Bytes> {
    loop {
        if let Some(bytes) = reader.next_snapshot()? {
            return Ok(bytes);
        }
        let n = read_half.read_buf(reader.buffer_mut()).await?;
        anyhow::ensure!(n != 0, "primary closed the connection while sending the snapshot");
    }
}

/// Consumes the replication stream after the snapshot: decode whatever
/// complete frames the buffer already holds, apply each silently, then go
/// back to the socket for more. The idle timeout is just a convenient way
/// to keep cycling back through the loop; it carries no protocol meaning.
async fn stream_commands(
    mut reader: FrameReader,
    mut read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    dispatcher: Dispatcher,
    replication_state: Arc<ReplicationState>,
) -> anyhow::Result<()> {
    loop {
        while let Some(args) = reader.next_request()? {
            let frame_len = encode_args(&args).len() as u64;
            match Request::new(args) {
                Ok(request) => {
                    if let Some(reply) = dispatcher.apply_silently(&request).await {
                        write_half.write_all(&reply.encode()).await?;
                    }
                }
                Err(err) => log::warn!("ignoring malformed command on the replication stream: {err}"),
            }
            replication_state.add_processed_bytes(frame_len);
        }

        match tokio::time::timeout(Duration::from_millis(500), read_half.read_buf(reader.buffer_mut())).await {
            Ok(Ok(0)) => {
                log::info!("primary connection closed; replica exits its replication role");
                return Ok(());
            }
            Ok(Ok(_)) => continue,
            Ok(Err(err)) => return Err(err.into()),
            Err(_elapsed) => continue,
        }
    }
}
