use crate::api::cart_management::models::in_cart;
use crate::api::order_management::models::has_purchased;
use crate::api::product_management::models::{product_tags_of, Product, ProductOut};
use crate::api::user_management::models::CurrentUser;
use crate::db::DbConn;
use crate::error::{ErrorResponse, MarketError};
use crate::pages::Page;
use crate::schema::{products, users};
use crate::settings::Settings;
use crate::storage;
use diesel::prelude::*;
use rocket::fs::NamedFile;
use rocket::http::Status;
use rocket::request::FlashMessage;
use rocket::State;
use rocket_dyn_templates::Template;
use serde::Serialize;

#[derive(Serialize)]
struct ProductPage {
    product: ProductOut,
    seller: String,
    is_owner: bool,
    purchased: bool,
    in_cart: bool,
}

#[get("/products/<id>")]
pub(crate) async fn product_detail(
    id: i32,
    viewer: CurrentUser,
    conn: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template, MarketError> {
    let viewer_id = viewer.user().map(|user| user.id);

    let page = conn
        .run(move |c| {
            let product = products::table
                .find(id)
                .first::<Product>(c)
                .optional()?
                .ok_or(MarketError::NotFound("product"))?;
            let tags = product_tags_of(c, product.id)?;
            let seller = users::table
                .find(product.user_id)
                .select(users::username)
                .first::<String>(c)?;

            let (purchased, in_cart) = match viewer_id {
                Some(viewer_id) => (
                    has_purchased(c, viewer_id, product.id)?,
                    in_cart(c, viewer_id, product.id)?,
                ),
                None => (false, false),
            };

            Ok::<_, MarketError>(ProductPage {
                is_owner: viewer_id == Some(product.user_id),
                product: ProductOut::new(&product, tags),
                seller,
                purchased,
                in_cart,
            })
        })
        .await?;

    Ok(Page::new(viewer.user(), page)
        .flash(flash)
        .render("product_detail"))
}

#[get("/images/products/<id>")]
pub(crate) async fn product_image(
    id: i32,
    conn: DbConn,
    settings: &State<Settings>,
) -> Result<NamedFile, ErrorResponse> {
    let product = conn
        .run(move |c| products::table.find(id).first::<Product>(c).optional())
        .await
        .map_err(|_| ErrorResponse::new(Status { code: 500 }, "Couldn't load product".to_string()))?
        .ok_or_else(|| ErrorResponse::new(Status { code: 404 }, "Product not found".to_string()))?;

    let not_found = || ErrorResponse::new(Status { code: 404 }, "Image not found".to_string());

    let path = product
        .display_image()
        .and_then(|image| storage::resolve(&settings.upload_dir(), image))
        .ok_or_else(not_found)?;

    NamedFile::open(&path).await.map_err(|err| {
        tracing::warn!(product_id = id, path = %path.display(), error = %err, "product image missing on disk");
        not_found()
    })
}
