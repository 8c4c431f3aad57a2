use anyhow::anyhow;
use digital_marketplace::settings::Settings;

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::new()?;
    std::fs::create_dir_all(settings.upload_dir())?;

    if let Err(err) = digital_marketplace::build(settings).launch().await {
        return Err(anyhow!("server stopped: {:?}", err));
    }
    Ok(())
}
