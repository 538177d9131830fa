mod redis;

use redis::config::ServerConfig;
use redis::server::RedisServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match ServerConfig::from_args() {
        Ok(config) => config,
        Err(err) => {
            log::error!("failed to parse startup configuration: {err}");
            std::process::exit(1);
        }
    };

    let server = match RedisServer::bootstrap(config).await {
        Ok(server) => server,
        Err(err) => {
            log::error!("failed to start the redis server: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = server.run().await {
        log::error!("redis server exited with an error: {err}");
        std::process::exit(1);
    }

    Ok(())
}
