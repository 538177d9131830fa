use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "redis-server", about = "A Redis-compatible in-memory key-value server")]
struct Cli {
    #[arg(long, default_value = "/tmp/redis-files")]
    dir: String,

    #[arg(long, default_value = "dump.rdb")]
    dbfilename: String,

    #[arg(long, default_value_t = 6379)]
    port: u16,

    /// "<host> <port>" of the primary to replicate from, e.g. "localhost 6379".
    #[arg(long)]
    replicaof: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub dir: String,
    pub dbfilename: String,
    pub port: u16,
    pub replica_of: Option<(String, u16)>,
}

impl ServerConfig {
    pub fn from_args() -> anyhow::Result<Self> {
        let cli = Cli::parse();
        let replica_of = cli.replicaof.as_deref().map(parse_replicaof).transpose()?;

        Ok(Self {
            dir: cli.dir,
            dbfilename: cli.dbfilename,
            port: cli.port,
            replica_of,
        })
    }

    pub fn is_replica(&self) -> bool {
        self.replica_of.is_some()
    }

    pub fn rdb_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }
}

fn parse_replicaof(value: &str) -> anyhow::Result<(String, u16)> {
    let mut parts = value.split_ascii_whitespace();
    let host = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("--replicaof requires '<host> <port>', got '{value}'"))?;
    let port = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("--replicaof requires '<host> <port>', got '{value}'"))?;
    anyhow::ensure!(
        parts.next().is_none(),
        "--replicaof takes exactly two space-separated tokens, got '{value}'"
    );
    let port: u16 = port
        .parse()
        .with_context(|| format!("--replicaof port '{port}' is not a valid port number"))?;
    Ok((host.to_string(), port))
}
