use crate::api::user_management::models::{CurrentUser, User, UserLoggedIn, UserOut};
use crate::api::user_management::sessions::{end_session, start_session, UserSession};
use crate::db::DbConn;
use crate::error::ErrorResponse;
use crate::pages::Page;
use crate::password::verify_password;
use crate::schema::users;
use crate::settings::Settings;
use crate::validation::validate_email;
use diesel::prelude::*;
use rocket::form::Form;
use rocket::http::{CookieJar, Status};
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::serde::json::Json;
use rocket::State;
use rocket_dyn_templates::Template;
use serde::Serialize;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(FromForm)]
pub struct LoginForm {
    email: String,
    password: String,
}

#[derive(Serialize, Default)]
struct LoginPage {
    email: String,
    github_enabled: bool,
}

fn login_page(email: String, github_enabled: bool) -> Page<LoginPage> {
    Page::new(
        None,
        LoginPage {
            email,
            github_enabled,
        },
    )
}

#[get("/login")]
pub(crate) fn show_login(
    viewer: CurrentUser,
    flash: Option<FlashMessage<'_>>,
    settings: &State<Settings>,
) -> Result<Template, Redirect> {
    if viewer.is_logged_in() {
        return Err(Redirect::to("/profile"));
    }
    Ok(login_page(String::new(), settings.github_client_id.is_some())
        .flash(flash)
        .render("login"))
}

#[post("/login", data = "<form>")]
pub(crate) async fn login(
    form: Form<LoginForm>,
    conn: DbConn,
    cookies: &CookieJar<'_>,
    sessions: &State<UserSession>,
    settings: &State<Settings>,
) -> Result<Redirect, Template> {
    let form = form.into_inner();
    let email = form.email.trim().to_lowercase();
    let github_enabled = settings.github_client_id.is_some();
    let reject = |email: String, msg: &str| {
        login_page(email, github_enabled)
            .error(msg)
            .render("login")
    };

    if validate_email(&email).is_err() || form.password.is_empty() {
        return Err(reject(email, INVALID_CREDENTIALS));
    }

    let lookup = email.clone();
    let user = conn
        .run(move |c| {
            users::table
                .filter(users::email.eq(lookup))
                .first::<User>(c)
                .optional()
        })
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "Couldn't load user for login");
            reject(email.clone(), "Login is unavailable right now")
        })?;

    let user = match user {
        Some(user) => user,
        None => {
            tracing::debug!(%email, "login for unknown email");
            return Err(reject(email, INVALID_CREDENTIALS));
        }
    };

    match verify_password(&user.password_hash, &form.password) {
        Ok(true) => {}
        Ok(false) => return Err(reject(email, INVALID_CREDENTIALS)),
        Err(err) => {
            tracing::error!(error = %err, user_id = user.id, "stored password hash unusable");
            return Err(reject(email, INVALID_CREDENTIALS));
        }
    }

    start_session(cookies, sessions, user.id).map_err(|err| {
        tracing::error!(error = %err, "Couldn't start session");
        reject(email.clone(), "Login is unavailable right now")
    })?;

    tracing::info!(user_id = user.id, "user logged in");
    Ok(Redirect::to("/profile"))
}

#[get("/logout")]
pub(crate) fn logout(cookies: &CookieJar<'_>, sessions: &State<UserSession>) -> Flash<Redirect> {
    end_session(cookies, sessions);
    Flash::success(Redirect::to("/login"), "You have been logged out.")
}

#[get("/check_login")]
pub(crate) async fn check_login(user: Option<UserLoggedIn>) -> Result<Json<UserOut>, ErrorResponse> {
    match user {
        Some(user) => Ok(Json(UserOut::from(&user.0))),
        None => Err(ErrorResponse::new(
            Status::Unauthorized,
            "Login required".to_string(),
        )),
    }
}
