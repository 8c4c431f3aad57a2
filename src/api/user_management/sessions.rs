use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::api::user_management::models::{CurrentUser, User, UserLoggedIn};
use crate::db::DbConn;
use crate::error::{ApiError, MarketError};
use crate::schema;
use diesel::prelude::*;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{self, FromRequest, Outcome};
use rocket::response::Redirect;
use rocket::{Request, State};
use serde::{Deserialize, Serialize};

pub(crate) const SESSION_COOKIE: &str = "session";
const MAX_SESSION_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 30);

#[derive(Serialize, Deserialize)]
pub(crate) struct SessionCookie {
    pub(crate) session_key: String,
    pub(crate) creation_time: SystemTime,
}

/// Session key to user id. Sessions live in memory and end with the process.
pub(crate) struct UserSession {
    pub(crate) sessions: Mutex<HashMap<String, i32>>,
}

impl UserSession {
    pub(crate) fn new() -> UserSession {
        UserSession {
            sessions: Mutex::new(HashMap::<String, i32>::new()),
        }
    }

    pub(crate) fn start(&self, user_id: i32) -> Result<String, MarketError> {
        let session_key = generate_session_key();
        self.sessions
            .lock()
            .map_err(|_| MarketError::Internal("session store poisoned".to_string()))?
            .insert(session_key.clone(), user_id);
        Ok(session_key)
    }

    pub(crate) fn user_id(&self, session_key: &str) -> Option<i32> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(session_key).copied())
    }

    pub(crate) fn end(&self, session_key: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(session_key);
        }
    }
}

fn generate_session_key() -> String {
    const LEN: usize = 32;

    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LEN)
        .map(char::from)
        .collect()
}

/// Registers a session for `user_id` and stores its key in the private
/// session cookie.
pub(crate) fn start_session(
    cookies: &CookieJar<'_>,
    sessions: &UserSession,
    user_id: i32,
) -> Result<(), MarketError> {
    let cookie = SessionCookie {
        session_key: sessions.start(user_id)?,
        creation_time: SystemTime::now(),
    };
    let cookie_string = serde_json::to_string(&cookie)
        .map_err(|err| MarketError::Internal(format!("Couldn't create session cookie {}", err)))?;

    cookies.add_private(
        Cookie::build(SESSION_COOKIE, cookie_string)
            .http_only(true)
            .same_site(SameSite::Lax)
            .finish(),
    );
    Ok(())
}

pub(crate) fn end_session(cookies: &CookieJar<'_>, sessions: &UserSession) {
    if let Some(cookie) = cookies.get_private(SESSION_COOKIE) {
        if let Ok(session) = serde_json::from_str::<SessionCookie>(cookie.value()) {
            sessions.end(&session.session_key);
        }
    }
    cookies.remove_private(Cookie::named(SESSION_COOKIE));
}

fn session_user_id(req: &Request<'_>, sessions: &UserSession) -> Result<i32, Status> {
    let cookie = req
        .cookies()
        .get_private(SESSION_COOKIE)
        .ok_or(Status::Unauthorized)?;

    let session = match serde_json::from_str::<SessionCookie>(cookie.value()) {
        Ok(session) => session,
        Err(_) => {
            req.cookies().remove_private(Cookie::named(SESSION_COOKIE));
            return Err(Status::Unauthorized);
        }
    };

    let session_age = session
        .creation_time
        .elapsed()
        .map_err(|_| Status::Unauthorized)?;
    if session_age > MAX_SESSION_AGE {
        sessions.end(&session.session_key);
        req.cookies().remove_private(Cookie::named(SESSION_COOKIE));
        return Err(Status::Unauthorized);
    }

    match sessions.user_id(&session.session_key) {
        Some(user_id) => Ok(user_id),
        None => {
            // Left over from before a restart.
            req.cookies().remove_private(Cookie::named(SESSION_COOKIE));
            Err(Status::Unauthorized)
        }
    }
}

async fn resolve_user(req: &Request<'_>) -> Result<User, Status> {
    let sessions = req
        .guard::<&State<UserSession>>()
        .await
        .succeeded()
        .ok_or(Status::InternalServerError)?;
    let user_id = session_user_id(req, sessions)?;

    let conn = req
        .guard::<DbConn>()
        .await
        .succeeded()
        .ok_or(Status::InternalServerError)?;

    use schema::users::dsl::*;

    let user = conn
        .run(move |c| users.find(user_id).first::<User>(c).optional())
        .await
        .map_err(|err| {
            tracing::error!(error = %err, user_id, "Couldn't load user from database");
            Status::InternalServerError
        })?;

    user.ok_or(Status::Unauthorized)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserLoggedIn {
    type Error = ApiError;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        // Cached so a handler asking for the user twice only hits the database once.
        let resolved = req
            .local_cache_async(async { resolve_user(req).await })
            .await;

        match resolved {
            Ok(user) => Outcome::Success(UserLoggedIn(user.clone())),
            Err(status) if *status == Status::Unauthorized => Outcome::Failure((
                *status,
                ApiError::new("Login required".to_string()),
            )),
            Err(status) => Outcome::Failure((
                *status,
                ApiError::new("Couldn't check session".to_string()),
            )),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = ApiError;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let user = req.guard::<UserLoggedIn>().await.succeeded().map(|u| u.0);
        Outcome::Success(CurrentUser(user))
    }
}

#[catch(401)]
pub(crate) fn redirect_to_login() -> Redirect {
    Redirect::to("/login")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_start_and_end() {
        let store = UserSession::new();
        let key = store.start(7).unwrap();

        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(store.user_id(&key), Some(7));

        store.end(&key);
        assert_eq!(store.user_id(&key), None);
    }

    #[test]
    fn every_login_gets_its_own_key() {
        let store = UserSession::new();
        let first = store.start(1).unwrap();
        let second = store.start(1).unwrap();

        assert_ne!(first, second);
        store.end(&first);
        assert_eq!(store.user_id(&second), Some(1));
    }

    #[test]
    fn session_cookie_round_trips_through_json() {
        let cookie = SessionCookie {
            session_key: "abc".to_string(),
            creation_time: SystemTime::now(),
        };
        let json = serde_json::to_string(&cookie).unwrap();
        let back: SessionCookie = serde_json::from_str(&json).unwrap();

        assert_eq!(back.session_key, "abc");
        assert!(back.creation_time.elapsed().unwrap() < MAX_SESSION_AGE);
    }
}
