//! Sign in with GitHub (authorization code flow).

use crate::api::user_management::models::{NewUser, User};
use crate::api::user_management::sessions::{start_session, UserSession};
use crate::db::DbConn;
use crate::error::MarketError;
use crate::password::{hash_password, random_password};
use crate::schema::users;
use crate::settings::Settings;
use crate::validation::{validate_email, MAX_USERNAME_LEN};
use diesel::prelude::*;
use diesel::PgConnection;
use rand::RngCore;
use reqwest::Url;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::response::{Flash, Redirect};
use rocket::tokio::task;
use rocket::State;
use serde::Deserialize;

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";
const STATE_COOKIE: &str = "oauth_state";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GithubUser {
    id: i64,
    login: String,
    email: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

struct GithubClient {
    client_id: String,
    client_secret: String,
    redirect_url: String,
    http: reqwest::Client,
}

impl GithubClient {
    fn from_settings(settings: &Settings) -> Result<GithubClient, MarketError> {
        match (&settings.github_client_id, &settings.github_client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Ok(GithubClient {
                client_id: id.clone(),
                client_secret: secret.clone(),
                redirect_url: settings.oauth_redirect_url(),
                http: reqwest::Client::builder()
                    .user_agent("digital-marketplace")
                    .build()
                    .map_err(|err| MarketError::OAuth(err.to_string()))?,
            }),
            _ => Err(MarketError::Forbidden(
                "GitHub login is not configured".to_string(),
            )),
        }
    }

    fn authorize_url(&self, state: &str) -> Result<Url, MarketError> {
        Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("scope", "user:email"),
                ("state", state),
            ],
        )
        .map_err(|err| MarketError::OAuth(err.to_string()))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, MarketError> {
        let response: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_url.as_str()),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| MarketError::OAuth(format!("token exchange failed: {}", err)))?
            .json()
            .await
            .map_err(|err| MarketError::OAuth(format!("invalid token response: {}", err)))?;

        match (response.access_token, response.error) {
            (Some(token), _) if !token.is_empty() => Ok(token),
            (_, Some(error)) => Err(MarketError::OAuth(format!(
                "{}: {}",
                error,
                response.error_description.unwrap_or_default()
            ))),
            _ => Err(MarketError::OAuth("no access token returned".to_string())),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
    ) -> Result<T, MarketError> {
        self.http
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| MarketError::OAuth(format!("GET {} failed: {}", url, err)))?
            .json()
            .await
            .map_err(|err| MarketError::OAuth(format!("invalid response from {}: {}", url, err)))
    }

    /// The GitHub account and an email for it. A private email is looked up
    /// through the emails endpoint, preferring the primary verified one.
    async fn fetch_identity(&self, token: &str) -> Result<(GithubUser, String), MarketError> {
        let user: GithubUser = self.get_json(USER_URL, token).await?;
        if let Some(email) = user.email.clone().filter(|email| !email.is_empty()) {
            return Ok((user, email));
        }

        let emails: Vec<GithubEmail> = self.get_json(EMAILS_URL, token).await?;
        let email = pick_email(&emails)
            .ok_or_else(|| MarketError::OAuth("no verified email on the GitHub account".to_string()))?;
        Ok((user, email))
    }
}

fn pick_email(emails: &[GithubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}

fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A username for a new account, derived from the GitHub login.
fn username_from_login(login: &str) -> String {
    let mut name: String = login
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(MAX_USERNAME_LEN)
        .collect();
    while name.len() < 3 {
        name.push('_');
    }
    name
}

fn find_or_create_user(
    c: &PgConnection,
    email: &str,
    github: &GithubUser,
    password_hash: String,
) -> Result<User, MarketError> {
    if let Some(user) = users::table
        .filter(users::email.eq(email))
        .first::<User>(c)
        .optional()?
    {
        return Ok(user);
    }

    let mut username = username_from_login(&github.login);
    let taken = diesel::select(diesel::dsl::exists(
        users::table.filter(users::username.eq(&username)),
    ))
    .get_result::<bool>(c)?;
    if taken {
        let suffix = format!("_{}", github.id);
        username.truncate(MAX_USERNAME_LEN.saturating_sub(suffix.len()));
        username.push_str(&suffix);
    }

    let user = diesel::insert_into(users::table)
        .values(&NewUser {
            username,
            email: email.to_string(),
            password_hash,
        })
        .get_result::<User>(c)?;
    tracing::info!(user_id = user.id, github_id = github.id, "account created from GitHub login");
    Ok(user)
}

#[get("/auth/github")]
pub(crate) fn github_login(
    cookies: &CookieJar<'_>,
    settings: &State<Settings>,
) -> Result<Redirect, Flash<Redirect>> {
    let client = GithubClient::from_settings(settings).map_err(login_failed)?;
    let state = generate_state();
    let url = client.authorize_url(&state).map_err(login_failed)?;

    cookies.add_private(
        Cookie::build(STATE_COOKIE, state)
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(rocket::time::Duration::minutes(10))
            .finish(),
    );
    Ok(Redirect::to(url.to_string()))
}

#[get("/auth/github/callback?<code>&<state>")]
pub(crate) async fn github_callback(
    code: Option<String>,
    state: Option<String>,
    cookies: &CookieJar<'_>,
    settings: &State<Settings>,
    sessions: &State<UserSession>,
    conn: DbConn,
) -> Result<Redirect, Flash<Redirect>> {
    let expected = cookies.get_private(STATE_COOKIE).map(|c| c.value().to_string());
    cookies.remove_private(Cookie::named(STATE_COOKIE));

    match (&expected, &state) {
        (Some(expected), Some(state)) if expected == state => {}
        _ => {
            tracing::warn!("GitHub callback with missing or mismatched state");
            return Err(login_failed(MarketError::Forbidden(
                "Invalid login state, please try again".to_string(),
            )));
        }
    }
    let code = code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| login_failed(MarketError::OAuth("no authorization code".to_string())))?;

    let client = GithubClient::from_settings(settings).map_err(login_failed)?;
    let token = client.exchange_code(&code).await.map_err(login_failed)?;
    let (github, email) = client.fetch_identity(&token).await.map_err(login_failed)?;
    let email = email.trim().to_lowercase();
    validate_email(&email).map_err(login_failed)?;

    let password_hash = task::spawn_blocking(|| hash_password(&random_password()))
        .await
        .map_err(|err| MarketError::Internal(err.to_string()))
        .and_then(|hashed| hashed)
        .map_err(login_failed)?;

    let user = conn
        .run(move |c| find_or_create_user(c, &email, &github, password_hash))
        .await
        .map_err(login_failed)?;

    start_session(cookies, sessions, user.id).map_err(login_failed)?;
    tracing::info!(user_id = user.id, "user logged in with GitHub");
    Ok(Redirect::to("/profile"))
}

fn login_failed(err: MarketError) -> Flash<Redirect> {
    if err.status().code >= 500 || matches!(err, MarketError::OAuth(_)) {
        tracing::error!(error = %err, "GitHub login failed");
    }
    let message = match err {
        MarketError::OAuth(_) => "GitHub login failed, please try again".to_string(),
        err => err.public_message(),
    };
    Flash::error(Redirect::to("/login"), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::tests::settings_from;

    fn email(address: &str, primary: bool, verified: bool) -> GithubEmail {
        GithubEmail {
            email: address.to_string(),
            primary,
            verified,
        }
    }

    #[test]
    fn prefers_primary_verified_email() {
        let emails = vec![
            email("old@example.com", false, true),
            email("main@example.com", true, true),
        ];
        assert_eq!(pick_email(&emails).as_deref(), Some("main@example.com"));

        let emails = vec![
            email("unverified@example.com", true, false),
            email("backup@example.com", false, true),
        ];
        assert_eq!(pick_email(&emails).as_deref(), Some("backup@example.com"));

        assert_eq!(pick_email(&[email("x@example.com", true, false)]), None);
    }

    #[test]
    fn usernames_are_sanitised() {
        assert_eq!(username_from_login("octo-cat"), "octo_cat");
        assert_eq!(username_from_login("ab"), "ab_");
        assert_eq!(username_from_login(&"a".repeat(40)).len(), MAX_USERNAME_LEN);
    }

    #[test]
    fn state_is_random_hex() {
        let state = generate_state();
        assert_eq!(state.len(), 64);
        assert!(hex::decode(&state).is_ok());
        assert_ne!(state, generate_state());
    }

    #[test]
    fn client_requires_credentials() {
        assert!(GithubClient::from_settings(&settings_from(&[])).is_err());

        let settings = settings_from(&[
            ("GITHUB_CLIENT_ID", "id123"),
            ("GITHUB_CLIENT_SECRET", "secret"),
            ("BASE_URL", "https://shop.example"),
        ]);
        let client = GithubClient::from_settings(&settings).unwrap();
        let url = client.authorize_url("xyz").unwrap();

        assert_eq!(url.host_str(), Some("github.com"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("client_id".to_string(), "id123".to_string())));
        assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
        assert!(pairs.contains(&(
            "redirect_uri".to_string(),
            "https://shop.example/auth/github/callback".to_string()
        )));
    }
}
