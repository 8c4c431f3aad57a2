#[macro_use]
extern crate rocket;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod api;
pub mod db;
pub mod error;
pub mod mail;
pub mod money;
pub mod pages;
pub mod password;
pub mod schema;
pub mod settings;
pub mod storage;
pub mod tokens;
pub mod validation;

use api::cart_management::cart;
use api::download_management::download;
use api::home;
use api::order_management::{buy, checkout, success};
use api::product_management::{get_product, list, upload};
use api::user_management::sessions::{self, UserSession};
use api::user_management::{login, oauth, profile, register};
use db::DbConn;
use mail::Mailer;
use rocket::data::{Limits, ToByteUnit};
use rocket::figment::util::map;
use rocket::fs::{relative, FileServer};
use rocket::{Build, Rocket};
use rocket_dyn_templates::Template;
use settings::Settings;
use tokens::DownloadTokens;

/// In-memory state shared by the handlers: sessions, download tokens, the
/// mailer and the settings themselves.
fn manage_state(rocket: Rocket<Build>, settings: Settings) -> Rocket<Build> {
    let tokens = DownloadTokens::new(chrono::Duration::hours(settings.download_token_ttl_hours));
    let mailer = Mailer::from_settings(&settings);

    rocket
        .manage(UserSession::new())
        .manage(tokens)
        .manage(mailer)
        .manage(settings)
}

/// The marketplace server: the database pool and its URL, migrations,
/// templates and upload limits, then every route.
pub fn build(settings: Settings) -> Rocket<Build> {
    let limits = Limits::default()
        .limit("file", validation::MAX_PRODUCT_FILE_SIZE.bytes())
        .limit("data-form", 1100.mebibytes());

    let figment = rocket::Config::figment()
        .merge((
            "databases",
            map! { db::DATABASE_NAME => map! { "url" => settings.database_url() } },
        ))
        .merge(("limits", limits));

    tracing::info!(
        upload_folder = %settings.upload_folder,
        base_url = %settings.base_url,
        smtp = settings.smtp_host.is_some(),
        github = settings.github_client_id.is_some(),
        "configuring marketplace"
    );

    manage_state(rocket::custom(figment), settings)
        .attach(DbConn::fairing())
        .attach(db::migrations_fairing())
        .attach(Template::fairing())
        .mount(
            "/",
            routes![
                home::index,
                home::health,
                register::show_register,
                register::register,
                login::show_login,
                login::login,
                login::logout,
                oauth::github_login,
                oauth::github_callback,
                profile::show_profile,
                profile::change_password,
                profile::earn_money,
                list::products_page,
                get_product::product_detail,
                get_product::product_image,
                upload::show_upload,
                upload::upload,
                cart::show_cart,
                cart::add_to_cart,
                cart::remove_from_cart,
                checkout::checkout,
                buy::show_buy,
                buy::buy,
                success::order_success,
                download::download_with_token,
                download::secure_download,
                download::product_file,
            ],
        )
        .mount(
            "/api",
            routes![list::api_products, list::api_tags, login::check_login],
        )
        .mount("/static", FileServer::from(relative!("static")))
        .register("/", catchers![sessions::redirect_to_login])
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rocket::http::{ContentType, Status};
    use rocket::local::blocking::Client;

    use super::*;
    use crate::api::user_management::models::UserLoggedIn;
    use crate::settings::tests::settings_from;
    use crate::storage::tests::scratch_dir;

    #[get("/members")]
    fn members(user: UserLoggedIn) -> String {
        user.0.username
    }

    /// Only the routes that work without a database or templates.
    fn client(upload_folder: &str) -> Client {
        let settings = settings_from(&[("UPLOAD_FOLDER", upload_folder)]);
        let rocket = manage_state(rocket::build(), settings)
            .mount(
                "/",
                routes![home::health, download::download_with_token, members],
            )
            .mount("/api", routes![login::check_login])
            .mount("/static", FileServer::from(relative!("static")))
            .register("/", catchers![sessions::redirect_to_login]);

        Client::tracked(rocket).expect("valid rocket instance")
    }

    #[test]
    fn health_check() {
        let client = client("uploads");
        let response = client.get("/health").dispatch();

        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().as_deref(), Some("OK"));
    }

    #[test]
    fn unknown_download_token_is_forbidden() {
        let client = client("uploads");
        let response = client.get("/download/0123abcd").dispatch();

        assert_eq!(response.status(), Status::Forbidden);
        assert_eq!(response.content_type(), Some(ContentType::JSON));
        assert!(response
            .into_string()
            .unwrap_or_default()
            .contains("Invalid or expired download link"));
    }

    #[test]
    fn download_token_serves_an_attachment() {
        let dir = scratch_dir("download-route");
        let file = dir.join("42_product_files.zip");
        fs::write(&file, b"zip bytes").unwrap();

        let client = client(dir.to_str().unwrap());
        let token = client
            .rocket()
            .state::<DownloadTokens>()
            .unwrap()
            .issue(&file)
            .unwrap();

        let response = client.get(format!("/download/{}", token)).dispatch();
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::ZIP));
        assert_eq!(
            response.headers().get_one("Content-Disposition"),
            Some("attachment; filename=\"42_product_files.zip\"")
        );
        assert_eq!(response.into_bytes().unwrap(), b"zip bytes".to_vec());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn download_of_deleted_file_is_not_found() {
        let dir = scratch_dir("download-gone");
        let file = dir.join("7_product_files.zip");
        fs::write(&file, b"zip").unwrap();

        let client = client(dir.to_str().unwrap());
        let token = client
            .rocket()
            .state::<DownloadTokens>()
            .unwrap()
            .issue(&file)
            .unwrap();
        fs::remove_file(&file).unwrap();

        let response = client.get(format!("/download/{}", token)).dispatch();
        assert_eq!(response.status(), Status::NotFound);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn anonymous_visitors_are_sent_to_login() {
        let client = client("uploads");
        let response = client.get("/members").dispatch();

        assert_eq!(response.status(), Status::SeeOther);
        assert_eq!(response.headers().get_one("Location"), Some("/login"));
    }

    #[test]
    fn check_login_without_session_is_unauthorized_json() {
        let client = client("uploads");
        let response = client.get("/api/check_login").dispatch();

        assert_eq!(response.status(), Status::Unauthorized);
        assert_eq!(response.content_type(), Some(ContentType::JSON));
    }

    #[test]
    fn forged_session_cookie_is_ignored() {
        let client = client("uploads");
        let response = client
            .get("/members")
            .cookie(rocket::http::Cookie::new("session", "not-encrypted"))
            .dispatch();

        assert_eq!(response.headers().get_one("Location"), Some("/login"));
    }

    #[test]
    fn static_files_are_served() {
        let client = client("uploads");
        let response = client.get("/static/style.css").dispatch();

        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::CSS));
    }
}
