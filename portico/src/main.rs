use std::sync::Arc;

use portico_core::{Master, Router};

const DEFAULT_CONFIG: &str = "portico.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let blocks = portico_config::load_from_file(&config_path)?;
    let router = Arc::new(Router::build(&blocks)?);

    Master::new(blocks).run(router).await
}
