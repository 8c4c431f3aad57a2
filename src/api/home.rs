use crate::api::product_management::models::{with_tags, Product, ProductOut};
use crate::api::user_management::models::CurrentUser;
use crate::db::DbConn;
use crate::pages::Page;
use crate::schema::products;
use diesel::prelude::*;
use rocket::request::FlashMessage;
use rocket_dyn_templates::Template;
use serde::Serialize;

const LATEST_PRODUCTS: i64 = 6;

#[derive(Serialize)]
struct HomePage {
    latest: Vec<ProductOut>,
}

#[get("/")]
pub(crate) async fn index(
    viewer: CurrentUser,
    conn: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Template {
    let latest = conn
        .run(|c| {
            let list = products::table
                .order(products::created_at.desc())
                .limit(LATEST_PRODUCTS)
                .load::<Product>(c)?;
            with_tags(c, list)
        })
        .await
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "Couldn't load latest products");
            Vec::new()
        });

    Page::new(viewer.user(), HomePage { latest })
        .flash(flash)
        .render("index")
}

#[get("/health")]
pub(crate) fn health() -> &'static str {
    "OK"
}
