use crate::api::user_management::models::{CurrentUser, NewUser, User};
use crate::db::DbConn;
use crate::error::MarketError;
use crate::pages::Page;
use crate::password::hash_password;
use crate::schema::users;
use crate::validation::{validate_email, validate_password, validate_username};
use diesel::prelude::*;
use diesel::PgConnection;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rocket::form::Form;
use rocket::response::{Flash, Redirect};
use rocket::tokio::task;
use rocket_dyn_templates::Template;
use serde::Serialize;

#[derive(FromForm)]
pub struct RegisterForm {
    username: String,
    email: String,
    password: String,
}

#[derive(Serialize)]
struct RegisterPage {
    username: String,
    email: String,
}

fn register_page(username: String, email: String) -> Page<RegisterPage> {
    Page::new(None, RegisterPage { username, email })
}

#[get("/register")]
pub(crate) fn show_register(viewer: CurrentUser) -> Result<Template, Redirect> {
    if viewer.is_logged_in() {
        return Err(Redirect::to("/profile"));
    }
    Ok(register_page(String::new(), String::new()).render("register"))
}

fn validate(form: &RegisterForm) -> Result<(), MarketError> {
    validate_username(&form.username)?;
    validate_email(&form.email)?;
    validate_password(&form.password)
}

enum Registration {
    Created(User),
    Taken(&'static str),
}

fn insert_user(c: &PgConnection, new_user: NewUser) -> Result<Registration, MarketError> {
    let email_taken = diesel::select(diesel::dsl::exists(
        users::table.filter(users::email.eq(&new_user.email)),
    ))
    .get_result::<bool>(c)?;
    if email_taken {
        return Ok(Registration::Taken("An account with this email already exists"));
    }

    let name_taken = diesel::select(diesel::dsl::exists(
        users::table.filter(users::username.eq(&new_user.username)),
    ))
    .get_result::<bool>(c)?;
    if name_taken {
        return Ok(Registration::Taken("This username is already taken"));
    }

    match diesel::insert_into(users::table)
        .values(&new_user)
        .get_result::<User>(c)
    {
        Ok(user) => Ok(Registration::Created(user)),
        // Lost a race with a concurrent registration.
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(
            Registration::Taken("An account with this email or username already exists"),
        ),
        Err(err) => Err(err.into()),
    }
}

#[post("/register", data = "<form>")]
pub(crate) async fn register(
    form: Form<RegisterForm>,
    conn: DbConn,
) -> Result<Flash<Redirect>, Template> {
    let mut form = form.into_inner();
    form.username = form.username.trim().to_string();
    form.email = form.email.trim().to_lowercase();

    let username = form.username.clone();
    let email = form.email.clone();
    let reject = |msg: String| {
        register_page(username.clone(), email.clone())
            .error(msg)
            .render("register")
    };

    if let Err(err) = validate(&form) {
        return Err(reject(err.to_string()));
    }

    let password = form.password;
    let password_hash = task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| MarketError::Internal(err.to_string()))
        .and_then(|hashed| hashed)
        .map_err(|err| {
            tracing::error!(error = %err, "Couldn't hash password");
            reject(err.public_message())
        })?;

    let new_user = NewUser {
        username: form.username,
        email: form.email,
        password_hash,
    };

    let registration = conn
        .run(move |c| insert_user(c, new_user))
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "Couldn't register user");
            reject(err.public_message())
        })?;

    let user = match registration {
        Registration::Created(user) => user,
        Registration::Taken(msg) => return Err(reject(msg.to_string())),
    };

    tracing::info!(user_id = user.id, username = %user.username, "user registered");

    Ok(Flash::success(
        Redirect::to("/login"),
        "Registration successful. Please log in.",
    ))
}
