use redis::Client;
use redis::aio::ConnectionManager;

/// Connect the redis state backend and check it answers before the first cycle.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let target = redacted_target(redis_url);
    let client = Client::open(redis_url)
        .map_err(|e| anyhow::anyhow!("invalid REDIS_URL for {}: {}", target, e))?;
    let mut manager = ConnectionManager::new(client)
        .await
        .map_err(|e| anyhow::anyhow!("cannot reach redis state backend at {}: {}", target, e))?;

    let pong: String = redis::cmd("PING").query_async(&mut manager).await?;
    tracing::info!(backend = %target, reply = %pong, "Connected to Redis state backend");
    Ok(manager)
}

/// `host:port/db` of a redis URL, without credentials, for logs and errors.
pub fn redacted_target(redis_url: &str) -> String {
    let rest = redis_url
        .split_once("://")
        .map_or(redis_url, |(_, rest)| rest);
    let rest = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
    rest.to_string()
}
