use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt::Debug;

use crate::money::format_cents;
use crate::schema::users;

#[derive(Queryable, Identifiable, Debug, Clone)]
#[table_name = "users"]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub balance_cents: i64,
    pub created_at: NaiveDateTime,
}

/// What templates and the JSON API get to see of a user.
#[derive(Serialize, Debug, Clone)]
pub struct UserOut {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub balance_cents: i64,
    pub balance: String,
}

impl From<&User> for UserOut {
    fn from(user: &User) -> Self {
        UserOut {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            balance_cents: user.balance_cents,
            balance: format_cents(user.balance_cents),
        }
    }
}

#[derive(Insertable)]
#[table_name = "users"]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Request guard for routes that need a signed-in user. Fails with 401,
/// which the HTML catcher turns into a redirect to `/login`.
pub struct UserLoggedIn(pub User);

/// Request guard that never fails: the signed-in user, if there is one.
pub struct CurrentUser(pub Option<User>);

impl CurrentUser {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.0.is_some()
    }
}
