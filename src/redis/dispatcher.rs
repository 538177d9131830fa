use std::sync::Arc;

use bytes::Bytes;

use super::config::ServerConfig;
use super::error::RedisError;
use super::keyspace::Keyspace;
use super::rdb;
use super::repl_state::ReplicationState;
use super::resp::command::Request;
use super::resp::RespValue;

/// What a dispatched request produced: a reply to write back (if any), a
/// second raw payload to write immediately after it (only `PSYNC`'s
/// snapshot bulk uses this), whether it should be fanned out to replicas,
/// and whether this connection should be promoted to a replica sink.
pub struct DispatchOutcome {
    pub response: Option<RespValue>,
    pub extra_bytes: Option<Bytes>,
    pub propagate: bool,
    pub promote_to_replica: bool,
}

impl DispatchOutcome {
    fn reply(value: RespValue) -> Self {
        Self {
            response: Some(value),
            extra_bytes: None,
            propagate: false,
            promote_to_replica: false,
        }
    }

    fn write(value: RespValue) -> Self {
        Self {
            response: Some(value),
            extra_bytes: None,
            propagate: true,
            promote_to_replica: false,
        }
    }
}

pub struct Dispatcher {
    keyspace: Arc<Keyspace>,
    config: Arc<ServerConfig>,
    replication_state: Arc<ReplicationState>,
}

impl Dispatcher {
    pub fn new(keyspace: Arc<Keyspace>, config: Arc<ServerConfig>, replication_state: Arc<ReplicationState>) -> Self {
        Self {
            keyspace,
            config,
            replication_state,
        }
    }

    pub async fn dispatch(&self, req: &Request) -> anyhow::Result<DispatchOutcome> {
        match req.name_upper().as_slice() {
            b"PING" => Ok(self.ping()),
            b"ECHO" => self.echo(req),
            b"SET" => self.set(req).await,
            b"GET" => self.get(req).await,
            b"CONFIG" => self.config(req).await,
            b"KEYS" => self.keys(req).await,
            b"INFO" => Ok(self.info()),
            b"REPLCONF" => Ok(self.replconf(req)),
            b"PSYNC" => self.psync(),
            _ => Err(RedisError::UnknownCommand.into()),
        }
    }

    /// Applies a command from the replication stream purely for its side
    /// effects, suppressing the reply the same command would produce over
    /// a normal client connection. `REPLCONF GETACK *` is the sole
    /// exception: it always gets a reply, carrying this replica's
    /// accumulated offset.
    pub async fn apply_silently(&self, req: &Request) -> Option<RespValue> {
        if req.name_upper() == b"REPLCONF" {
            if req.arg(1).is_some_and(|sub| sub.eq_ignore_ascii_case(b"GETACK")) {
                return Some(self.replconf_ack_reply());
            }
            return None;
        }

        match self.dispatch(req).await {
            Ok(_) => None,
            Err(err) => {
                log::debug!("ignoring error applying replicated command silently: {err}");
                None
            }
        }
    }

    fn ping(&self) -> DispatchOutcome {
        DispatchOutcome::reply(RespValue::simple_string("PONG"))
    }

    fn echo(&self, req: &Request) -> anyhow::Result<DispatchOutcome> {
        let message = req
            .arg(1)
            .ok_or_else(|| RedisError::WrongArity { command: "echo".into() })?;
        Ok(DispatchOutcome::reply(RespValue::bulk_string(message.clone())))
    }

    async fn set(&self, req: &Request) -> anyhow::Result<DispatchOutcome> {
        match req.args.len() {
            3 => {
                let key = req.args[1].clone();
                let value = req.args[2].clone();
                self.keyspace.set(key, value).await;
                Ok(DispatchOutcome::write(RespValue::simple_string("OK")))
            }
            5 if req.args[3].eq_ignore_ascii_case(b"PX") => {
                let ms: i64 = std::str::from_utf8(&req.args[4])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(RedisError::WrongArity { command: "set".into() })?;
                anyhow::ensure!(ms >= 0, RedisError::WrongArity { command: "set".into() });

                let key = req.args[1].clone();
                let value = req.args[2].clone();
                self.keyspace.set_px(key, value, ms as u64).await;
                Ok(DispatchOutcome::write(RespValue::simple_string("OK")))
            }
            _ => Err(RedisError::WrongArity { command: "set".into() }.into()),
        }
    }

    async fn get(&self, req: &Request) -> anyhow::Result<DispatchOutcome> {
        let key = req
            .arg(1)
            .ok_or_else(|| RedisError::WrongArity { command: "get".into() })?;
        let response = match self.keyspace.get(key).await {
            Some(bytes) => RespValue::BulkString(bytes),
            None => RespValue::NullBulkString,
        };
        Ok(DispatchOutcome::reply(response))
    }

    async fn config(&self, req: &Request) -> anyhow::Result<DispatchOutcome> {
        let sub = req.arg(1).map(|b| b.to_ascii_uppercase());
        match sub.as_deref() {
            Some(b"GET") => {
                let name = req
                    .arg(2)
                    .ok_or_else(|| RedisError::WrongArity { command: "config".into() })?;
                let name_lower = name.to_ascii_lowercase();
                let value = match name_lower.as_slice() {
                    b"dir" => Some(self.config.dir.clone()),
                    b"dbfilename" => Some(self.config.dbfilename.clone()),
                    _ => None,
                };
                let response = match value {
                    Some(v) => RespValue::array(vec![
                        RespValue::bulk_string(Bytes::from(name_lower)),
                        RespValue::bulk_string(Bytes::from(v)),
                    ]),
                    None => RespValue::array(vec![]),
                };
                Ok(DispatchOutcome::reply(response))
            }
            _ => Ok(DispatchOutcome::reply(RespValue::array(vec![]))),
        }
    }

    async fn keys(&self, req: &Request) -> anyhow::Result<DispatchOutcome> {
        let pattern = req
            .arg(1)
            .ok_or_else(|| RedisError::WrongArity { command: "keys".into() })?;
        let response = if &pattern[..] == b"*" {
            RespValue::array(self.keyspace.keys_all().await.into_iter().map(RespValue::BulkString).collect())
        } else {
            RespValue::array(vec![])
        };
        Ok(DispatchOutcome::reply(response))
    }

    fn info(&self) -> DispatchOutcome {
        let body = format!(
            "role:{}\nmaster_replid:{}\nmaster_repl_offset:{}",
            self.replication_state.role_name(),
            self.replication_state.replid(),
            self.replication_state.processed_bytes(),
        );
        DispatchOutcome::reply(RespValue::bulk_string(Bytes::from(body)))
    }

    /// Covers the primary-side view of `REPLCONF`: any subcommand just
    /// gets `+OK`, with `listening-port`/`capa` noted for logging. The
    /// replica-side `GETACK` reply is handled entirely in `apply_silently`,
    /// since it only ever arrives over the inbound connection to the
    /// primary.
    fn replconf(&self, req: &Request) -> DispatchOutcome {
        match req.arg(1).map(|b| b.to_ascii_lowercase()).as_deref() {
            Some(b"listening-port") => log::debug!("replconf listening-port from a connecting replica"),
            Some(b"capa") => log::debug!("replconf capa from a connecting replica"),
            _ => {}
        }
        DispatchOutcome::reply(RespValue::simple_string("OK"))
    }

    fn psync(&self) -> anyhow::Result<DispatchOutcome> {
        match &*self.replication_state {
            ReplicationState::Primary { replid } => {
                let header = RespValue::simple_string(Bytes::from(format!("FULLRESYNC {replid} 0")));
                let snapshot = rdb::empty_snapshot();
                let mut extra = bytes::BytesMut::new();
                extra.extend_from_slice(format!("${}\r\n", snapshot.len()).as_bytes());
                extra.extend_from_slice(&snapshot);

                Ok(DispatchOutcome {
                    response: Some(header),
                    extra_bytes: Some(extra.freeze()),
                    propagate: false,
                    promote_to_replica: true,
                })
            }
            ReplicationState::Replica { .. } => Err(anyhow::anyhow!("PSYNC requires this server to be running as a primary")),
        }
    }

    fn replconf_ack_reply(&self) -> RespValue {
        RespValue::array(vec![
            RespValue::bulk_string(Bytes::from_static(b"REPLCONF")),
            RespValue::bulk_string(Bytes::from_static(b"ACK")),
            RespValue::bulk_string(Bytes::from(self.replication_state.processed_bytes().to_string())),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(replication_state: ReplicationState) -> Dispatcher {
        let config = Arc::new(ServerConfig {
            dir: "/tmp/redis-files".to_string(),
            dbfilename: "dump.rdb".to_string(),
            port: 6379,
            replica_of: None,
        });
        Dispatcher::new(Arc::new(Keyspace::new()), config, Arc::new(replication_state))
    }

    fn req(args: &[&[u8]]) -> Request {
        Request::new(args.iter().map(|a| Bytes::copy_from_slice(a)).collect()).unwrap()
    }

    #[tokio::test]
    async fn ping_replies_pong() {
        let d = dispatcher(ReplicationState::new_primary());
        let outcome = d.dispatch(&req(&[b"PING"])).await.unwrap();
        assert_eq!(outcome.response, Some(RespValue::simple_string("PONG")));
        assert!(!outcome.propagate);
    }

    #[tokio::test]
    async fn echo_replies_with_message() {
        let d = dispatcher(ReplicationState::new_primary());
        let outcome = d.dispatch(&req(&[b"ECHO", b"hello"])).await.unwrap();
        assert_eq!(outcome.response, Some(RespValue::bulk_string(Bytes::from_static(b"hello"))));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_and_marks_propagate() {
        let d = dispatcher(ReplicationState::new_primary());
        let outcome = d.dispatch(&req(&[b"SET", b"foo", b"bar"])).await.unwrap();
        assert!(outcome.propagate);
        assert_eq!(outcome.response, Some(RespValue::simple_string("OK")));

        let outcome = d.dispatch(&req(&[b"GET", b"foo"])).await.unwrap();
        assert_eq!(outcome.response, Some(RespValue::bulk_string(Bytes::from_static(b"bar"))));
        assert!(!outcome.propagate);
    }

    #[tokio::test]
    async fn get_missing_key_returns_null_bulk_string() {
        let d = dispatcher(ReplicationState::new_primary());
        let outcome = d.dispatch(&req(&[b"GET", b"missing"])).await.unwrap();
        assert_eq!(outcome.response, Some(RespValue::NullBulkString));
    }

    #[tokio::test]
    async fn set_wrong_arity_produces_the_exact_wire_error() {
        let d = dispatcher(ReplicationState::new_primary());
        let err = d.dispatch(&req(&[b"SET", b"foo"])).await.unwrap_err();
        let redis_err = err.downcast_ref::<RedisError>().unwrap();
        assert_eq!(redis_err.to_resp(), RespValue::simple_error("ERR wrong number of arguments for 'set' command"));
    }

    #[tokio::test]
    async fn set_px_negative_is_a_wrong_arity_error() {
        let d = dispatcher(ReplicationState::new_primary());
        let err = d.dispatch(&req(&[b"SET", b"foo", b"bar", b"PX", b"-5"])).await.unwrap_err();
        assert!(err.downcast_ref::<RedisError>().is_some());
    }

    #[tokio::test]
    async fn unknown_command_produces_the_exact_wire_error() {
        let d = dispatcher(ReplicationState::new_primary());
        let err = d.dispatch(&req(&[b"FROBNICATE"])).await.unwrap_err();
        let redis_err = err.downcast_ref::<RedisError>().unwrap();
        assert_eq!(redis_err.to_resp(), RespValue::simple_error("ERR unknown command"));
    }

    #[tokio::test]
    async fn config_get_dir_is_case_insensitive() {
        let d = dispatcher(ReplicationState::new_primary());
        let outcome = d.dispatch(&req(&[b"CONFIG", b"GET", b"DIR"])).await.unwrap();
        assert_eq!(
            outcome.response,
            Some(RespValue::array(vec![
                RespValue::bulk_string(Bytes::from_static(b"dir")),
                RespValue::bulk_string(Bytes::from_static(b"/tmp/redis-files")),
            ]))
        );
    }

    #[tokio::test]
    async fn config_get_unknown_param_returns_empty_array() {
        let d = dispatcher(ReplicationState::new_primary());
        let outcome = d.dispatch(&req(&[b"CONFIG", b"GET", b"maxmemory"])).await.unwrap();
        assert_eq!(outcome.response, Some(RespValue::array(vec![])));
    }

    #[tokio::test]
    async fn keys_only_supports_the_wildcard_pattern() {
        let d = dispatcher(ReplicationState::new_primary());
        d.dispatch(&req(&[b"SET", b"foo", b"bar"])).await.unwrap();

        let outcome = d.dispatch(&req(&[b"KEYS", b"*"])).await.unwrap();
        assert_eq!(outcome.response, Some(RespValue::array(vec![RespValue::bulk_string(Bytes::from_static(b"foo"))])));

        let outcome = d.dispatch(&req(&[b"KEYS", b"f*"])).await.unwrap();
        assert_eq!(outcome.response, Some(RespValue::array(vec![])));
    }

    #[tokio::test]
    async fn info_replication_reports_master_role() {
        let d = dispatcher(ReplicationState::new_primary());
        let outcome = d.dispatch(&req(&[b"INFO", b"REPLICATION"])).await.unwrap();
        let body = outcome.response.unwrap().into_bulk_string().unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.starts_with("role:master\n"));
        assert!(body.contains("master_repl_offset:0"));
    }

    #[tokio::test]
    async fn psync_on_a_replica_is_rejected() {
        let d = dispatcher(ReplicationState::new_replica("localhost".to_string(), 6379));
        assert!(d.dispatch(&req(&[b"PSYNC", b"?", b"-1"])).await.is_err());
    }

    #[tokio::test]
    async fn psync_on_a_primary_promotes_and_carries_a_snapshot() {
        let d = dispatcher(ReplicationState::new_primary());
        let outcome = d.dispatch(&req(&[b"PSYNC", b"?", b"-1"])).await.unwrap();
        assert!(outcome.promote_to_replica);
        assert!(outcome.extra_bytes.is_some());
        match outcome.response.unwrap() {
            RespValue::SimpleString(s) => assert!(s.starts_with(b"FULLRESYNC ")),
            other => panic!("expected a simple string, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn apply_silently_applies_set_without_a_reply() {
        let d = dispatcher(ReplicationState::new_replica("localhost".to_string(), 6379));
        let reply = d.apply_silently(&req(&[b"SET", b"foo", b"bar"])).await;
        assert!(reply.is_none());
        assert_eq!(d.keyspace.get(b"foo").await, Some(Bytes::from_static(b"bar")));
    }

    #[tokio::test]
    async fn apply_silently_answers_getack_with_the_accumulated_offset() {
        let d = dispatcher(ReplicationState::new_replica("localhost".to_string(), 6379));
        d.replication_state.add_processed_bytes(37);
        let reply = d.apply_silently(&req(&[b"REPLCONF", b"GETACK", b"*"])).await.unwrap();
        assert_eq!(
            reply.encode(),
            &b"*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n$2\r\n37\r\n"[..]
        );
    }
}
