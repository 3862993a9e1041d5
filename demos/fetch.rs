use std::time::Duration;

use resilient_http::{ClientConfig, ContentType, RequestContext, ResilientClient};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilient_http=debug".into()),
        )
        .init();

    let base = std::env::var("FETCH_BASE_URL").unwrap_or_else(|_| "http://httpbin.org".to_owned());

    let client = ResilientClient::new(
        ClientConfig::new()
            .with_dial_timeout(Duration::from_secs(1))
            .with_read_timeout(Duration::from_secs(5))
            .with_keep_alive(Duration::from_secs(30))
            .with_backoff_interval(Duration::from_millis(500)),
    )?;
    client.set_retry_count(2);

    let ctx = RequestContext::new().with_timeout(Duration::from_secs(30));

    let fetched: Value = client.get(&ctx, &format!("{base}/get"), None).await?;
    println!("GET  -> {fetched}");

    let posted: Value = client
        .post(
            &ctx,
            &format!("{base}/post"),
            ContentType::Json,
            None,
            &json!({ "hello": "world" }),
        )
        .await?;
    println!("POST -> {posted}");

    Ok(())
}
