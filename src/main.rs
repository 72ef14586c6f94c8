use std::time::Duration;

use clap::Parser;

use memograph::application::{Application, Configuration};
use memograph::sync::WatchService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Configuration::parse();
    Application::install_logging(&config);

    let app = Application::initialize(config.clone()).await?;

    let report = app.sync.sync(config.full).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if config.watch {
        let watch = WatchService::new(
            app.sync.clone(),
            Duration::from_millis(config.watch_debounce_ms),
        );
        watch.run().await?;
    }

    Ok(())
}
