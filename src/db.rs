use std::time::Duration;

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use diesel_migrations::RunMigrationsError;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket};
use rocket_sync_db_pools::database;

pub const DATABASE_NAME: &str = "marketplace";

#[database("marketplace")]
pub struct DbConn(PgConnection);

embed_migrations!();

pub fn run_migrations(c: &PgConnection) -> Result<(), RunMigrationsError> {
    embedded_migrations::run(c)
}

async fn run_db_migrations(rocket: Rocket<Build>) -> Result<Rocket<Build>, Rocket<Build>> {
    let conn = match DbConn::get_one(&rocket).await {
        Some(conn) => conn,
        None => {
            tracing::error!("no database connection available for migrations");
            return Err(rocket);
        }
    };

    match conn.run(|c| run_migrations(c)).await {
        Ok(()) => {
            tracing::info!("database migrations are up to date");
            Ok(rocket)
        }
        Err(err) => {
            tracing::error!(error = %err, "running database migrations failed");
            Err(rocket)
        }
    }
}

pub fn migrations_fairing() -> AdHoc {
    AdHoc::try_on_ignite("Database Migrations", run_db_migrations)
}

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Standalone pool for tools that run outside of Rocket.
pub fn establish_pool(database_url: &str) -> Result<PgPool, r2d2::Error> {
    Pool::builder()
        .max_size(2)
        .connection_timeout(Duration::from_secs(5))
        .build(ConnectionManager::<PgConnection>::new(database_url))
}
