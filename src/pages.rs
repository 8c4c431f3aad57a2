use rocket::request::FlashMessage;
use rocket_dyn_templates::Template;
use serde::Serialize;

use crate::api::user_management::models::{User, UserOut};

/// Common template context: login state, the viewer, and any error or notice
/// to show above the page content.
#[derive(Serialize)]
pub struct Page<T: Serialize> {
    logged_in: bool,
    user: Option<UserOut>,
    error: Option<String>,
    notice: Option<String>,
    #[serde(flatten)]
    content: T,
}

impl<T: Serialize> Page<T> {
    pub fn new(viewer: Option<&User>, content: T) -> Page<T> {
        Page {
            logged_in: viewer.is_some(),
            user: viewer.map(UserOut::from),
            error: None,
            notice: None,
            content,
        }
    }

    pub fn flash(mut self, flash: Option<FlashMessage<'_>>) -> Self {
        if let Some(flash) = flash {
            if flash.kind() == "error" {
                self.error = Some(flash.message().to_string());
            } else {
                self.notice = Some(flash.message().to_string());
            }
        }
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn render(self, name: &'static str) -> Template {
        Template::render(name, &self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn user() -> User {
        User {
            id: 4,
            username: "seller".to_string(),
            email: "seller@example.com".to_string(),
            password_hash: "$argon2id$...".to_string(),
            balance_cents: 1250,
            created_at: NaiveDate::from_ymd_opt(2024, 4, 2)
                .and_then(|d| d.and_hms_opt(12, 0, 0))
                .unwrap(),
        }
    }

    #[derive(Serialize)]
    struct Empty {}

    #[derive(Serialize)]
    struct Content {
        title: &'static str,
    }

    #[test]
    fn context_flattens_content_and_hides_password_hash() {
        let user = user();
        let page = Page::new(Some(&user), Content { title: "Cart" }).error("boom");
        let value = serde_json::to_value(&page).unwrap();

        assert_eq!(value["logged_in"], true);
        assert_eq!(value["title"], "Cart");
        assert_eq!(value["error"], "boom");
        assert_eq!(value["user"]["username"], "seller");
        assert_eq!(value["user"]["balance"], "12.50");
        assert!(value["user"].get("password_hash").is_none());
    }

    #[test]
    fn anonymous_context() {
        let page = Page::new(None, Empty {});
        let value = serde_json::to_value(&page).unwrap();

        assert_eq!(value["logged_in"], false);
        assert!(value["user"].is_null());
        assert!(value["notice"].is_null());
    }
}
