use tianqi_bot::Bot;
use tianqi_bot::adapters::ConsoleAdapter;
use tianqi_bot::plugins::WeatherPlugin;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tianqi_bot::log::init();

    let bot = Bot::builder()
        .config_path("config.toml")
        .data_dir("data")
        .adapter(ConsoleAdapter::default())
        .plugin(WeatherPlugin::new())
        .build()?;

    bot.run().await?;
    Ok(())
}
