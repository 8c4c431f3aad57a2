//! Sweeps the upload folder: staging directories and stray files go, and when
//! the database is reachable so do bundles and images no product points at.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use diesel::prelude::*;
use digital_marketplace::db::establish_pool;
use digital_marketplace::schema::products;
use digital_marketplace::settings::Settings;
use digital_marketplace::storage::{sweep_uploads, SweepReport};
use tracing_subscriber::EnvFilter;

/// Uploads younger than this may still be in progress on a running server.
const MIN_AGE: Duration = Duration::from_secs(15 * 60);

fn referenced_files(database_url: &str) -> anyhow::Result<HashSet<String>> {
    let pool = establish_pool(database_url).context("connecting to the database")?;
    let conn = pool.get().context("checking out a connection")?;

    let rows = products::table
        .select((products::file_path, products::image_path))
        .load::<(String, Option<String>)>(&*conn)
        .context("loading product files")?;

    Ok(rows
        .into_iter()
        .flat_map(|(file, image)| std::iter::once(file).chain(image))
        .map(|name| name.trim_start_matches('/').to_string())
        .collect())
}

fn print_report(report: &SweepReport) {
    println!("Files found:      {}", report.total_files);
    println!("Files removed:    {}", report.removed_files);
    println!("Files kept:       {}", report.kept_files);
    println!("Staging removed:  {}", report.removed_temp_dirs);
    println!("Skipped (recent): {}", report.skipped_recent);
    println!("Bytes total:      {}", report.total_bytes);
    println!("Bytes freed:      {}", report.removed_bytes);
    println!("Bytes kept:       {}", report.kept_bytes());
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::new().context("reading settings")?;
    let upload_dir = settings.upload_dir();
    if !upload_dir.is_dir() {
        tracing::warn!(dir = %upload_dir.display(), "upload folder does not exist, nothing to do");
        return Ok(());
    }

    let referenced = match referenced_files(&settings.database_url()) {
        Ok(referenced) => {
            tracing::info!(files = referenced.len(), "products reference files");
            Some(referenced)
        }
        Err(err) => {
            tracing::warn!(error = %format!("{:#}", err), "database unavailable, keeping all bundles and images");
            None
        }
    };

    let report = sweep_uploads(&upload_dir, referenced.as_ref(), MIN_AGE)
        .with_context(|| format!("sweeping {}", upload_dir.display()))?;
    print_report(&report);
    Ok(())
}
