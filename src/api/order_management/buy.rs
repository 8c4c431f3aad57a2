use crate::api::order_management::checkout::{complete_purchase, success_redirect};
use crate::api::order_management::models::has_purchased;
use crate::api::order_management::purchase::Purchase;
use crate::api::product_management::models::{product_tags_of, Product, ProductOut};
use crate::api::user_management::models::UserLoggedIn;
use crate::db::DbConn;
use crate::error::MarketError;
use crate::mail::Mailer;
use crate::money::format_cents;
use crate::pages::Page;
use crate::schema::products;
use crate::settings::Settings;
use crate::tokens::DownloadTokens;
use diesel::prelude::*;
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::State;
use rocket_dyn_templates::Template;
use serde::Serialize;

#[derive(Serialize)]
struct BuyPage {
    product: ProductOut,
    balance_after: String,
    can_afford: bool,
}

#[get("/buy/<id>")]
pub(crate) async fn show_buy(
    id: i32,
    user: UserLoggedIn,
    conn: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template, MarketError> {
    let user_id = user.0.id;

    let product = conn
        .run(move |c| {
            let product = products::table
                .find(id)
                .first::<Product>(c)
                .optional()?
                .ok_or(MarketError::NotFound("product"))?;
            if product.user_id == user_id {
                return Err(MarketError::OwnProduct(product.title));
            }
            if has_purchased(c, user_id, id)? {
                return Err(MarketError::AlreadyPurchased(product.title));
            }
            let tags = product_tags_of(c, id)?;
            Ok(ProductOut::new(&product, tags))
        })
        .await?;

    let balance_after = user.0.balance_cents - product.price_cents;
    Ok(Page::new(
        Some(&user.0),
        BuyPage {
            product,
            balance_after: format_cents(balance_after),
            can_afford: balance_after >= 0,
        },
    )
    .flash(flash)
    .render("buy"))
}

#[post("/buy/<id>")]
pub(crate) async fn buy(
    id: i32,
    user: UserLoggedIn,
    conn: DbConn,
    settings: &State<Settings>,
    tokens: &State<DownloadTokens>,
    mailer: &State<Mailer>,
) -> Result<Redirect, Flash<Redirect>> {
    match complete_purchase(&user, &conn, Purchase::Single(id), settings, tokens, mailer).await {
        Ok(order_id) => Ok(success_redirect(order_id)),
        Err(err) => {
            if err.status().code >= 500 {
                tracing::error!(error = %err, user_id = user.0.id, product_id = id, "purchase failed");
            }
            Err(Flash::error(
                Redirect::to(format!("/buy/{}", id)),
                err.public_message(),
            ))
        }
    }
}
