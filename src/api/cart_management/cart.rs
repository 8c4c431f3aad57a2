use crate::api::cart_management::models::{CartItem, NewCartItem};
use crate::api::order_management::models::has_purchased;
use crate::api::product_management::models::{Product, ProductOut};
use crate::api::user_management::models::UserLoggedIn;
use crate::db::DbConn;
use crate::error::{ErrorResponse, MarketError};
use crate::money::{format_cents, sum_cents};
use crate::pages::Page;
use crate::schema::{cart_items, products};
use diesel::prelude::*;
use diesel::PgConnection;
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket_dyn_templates::Template;
use serde::Serialize;

#[derive(Serialize)]
struct CartLine {
    item_id: i32,
    product: ProductOut,
}

#[derive(Serialize)]
struct CartPage {
    items: Vec<CartLine>,
    total_cents: i64,
    total: String,
    can_afford: bool,
}

#[get("/cart")]
pub(crate) async fn show_cart(
    user: UserLoggedIn,
    conn: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template, MarketError> {
    let user_id = user.0.id;

    let lines = conn
        .run(move |c| {
            cart_items::table
                .inner_join(products::table)
                .filter(cart_items::user_id.eq(user_id))
                .order(cart_items::created_at.desc())
                .load::<(CartItem, Product)>(c)
        })
        .await?;

    let total_cents = sum_cents(lines.iter().map(|(_, product)| product.price_cents))?;
    let items = lines
        .iter()
        .map(|(item, product)| CartLine {
            item_id: item.id,
            product: ProductOut::new(product, Vec::new()),
        })
        .collect();

    Ok(Page::new(
        Some(&user.0),
        CartPage {
            items,
            total_cents,
            total: format_cents(total_cents),
            can_afford: user.0.balance_cents >= total_cents,
        },
    )
    .flash(flash)
    .render("cart"))
}

enum AddOutcome {
    Added(String),
    AlreadyInCart(String),
}

fn add_item(c: &PgConnection, user_id: i32, product_id: i32) -> Result<AddOutcome, MarketError> {
    let product = products::table
        .find(product_id)
        .first::<Product>(c)
        .optional()?
        .ok_or(MarketError::NotFound("product"))?;

    if product.user_id == user_id {
        return Err(MarketError::OwnProduct(product.title));
    }
    if has_purchased(c, user_id, product_id)? {
        return Err(MarketError::AlreadyPurchased(product.title));
    }

    let inserted = diesel::insert_into(cart_items::table)
        .values(&NewCartItem {
            user_id,
            product_id,
        })
        .on_conflict_do_nothing()
        .execute(c)?;

    Ok(if inserted == 0 {
        AddOutcome::AlreadyInCart(product.title)
    } else {
        AddOutcome::Added(product.title)
    })
}

#[post("/cart/add/<product_id>")]
pub(crate) async fn add_to_cart(
    product_id: i32,
    user: UserLoggedIn,
    conn: DbConn,
) -> Result<Flash<Redirect>, ErrorResponse> {
    let user_id = user.0.id;

    match conn.run(move |c| add_item(c, user_id, product_id)).await {
        Ok(AddOutcome::Added(title)) => {
            tracing::debug!(user_id, product_id, "added to cart");
            Ok(Flash::success(
                Redirect::to("/cart"),
                format!("\"{}\" was added to your cart.", title),
            ))
        }
        Ok(AddOutcome::AlreadyInCart(title)) => Ok(Flash::success(
            Redirect::to("/cart"),
            format!("\"{}\" is already in your cart.", title),
        )),
        Err(err @ MarketError::NotFound(_)) => Err(err.into()),
        Err(err) if err.status().code < 500 => {
            Ok(Flash::error(Redirect::to("/cart"), err.public_message()))
        }
        Err(err) => Err(err.into()),
    }
}

fn removal_flash(user_id: i32, item_id: i32, removed: QueryResult<usize>) -> Flash<Redirect> {
    match removed {
        Ok(0) => Flash::error(Redirect::to("/cart"), "That item is not in your cart."),
        Ok(_) => Flash::success(Redirect::to("/cart"), "Item removed from your cart."),
        Err(err) => {
            tracing::error!(user_id, item_id, error = %err, "Couldn't remove cart item");
            Flash::error(Redirect::to("/cart"), "Couldn't update your cart.")
        }
    }
}

#[post("/cart/remove/<item_id>")]
pub(crate) async fn remove_from_cart(
    item_id: i32,
    user: UserLoggedIn,
    conn: DbConn,
) -> Flash<Redirect> {
    let user_id = user.0.id;

    // Scoped to the owner so other users' items cannot be removed.
    let removed = conn
        .run(move |c| {
            diesel::delete(
                cart_items::table
                    .filter(cart_items::id.eq(item_id))
                    .filter(cart_items::user_id.eq(user_id)),
            )
            .execute(c)
        })
        .await;

    removal_flash(user_id, item_id, removed)
}

#[cfg(test)]
mod tests {
    use rocket::http::Status;
    use rocket::local::blocking::Client;

    use super::*;

    #[get("/removed/<count>")]
    fn removed(count: usize) -> Flash<Redirect> {
        removal_flash(1, 2, Ok(count))
    }

    #[get("/failed")]
    fn failed() -> Flash<Redirect> {
        removal_flash(1, 2, Err(diesel::result::Error::NotFound))
    }

    fn client() -> Client {
        let rocket = rocket::build().mount("/", routes![removed, failed]);
        Client::tracked(rocket).expect("valid rocket instance")
    }

    fn flash_cookie(response: &rocket::local::blocking::LocalResponse<'_>) -> String {
        response
            .cookies()
            .get("_flash")
            .map(|cookie| cookie.value().to_string())
            .unwrap_or_default()
    }

    #[test]
    fn removing_an_item_returns_to_the_cart() {
        let client = client();
        let response = client.get("/removed/1").dispatch();

        assert_eq!(response.status(), Status::SeeOther);
        assert_eq!(response.headers().get_one("Location"), Some("/cart"));
        assert!(flash_cookie(&response).contains("success"));
    }

    #[test]
    fn missing_or_foreign_item_returns_to_the_cart_with_an_error() {
        let client = client();
        let response = client.get("/removed/0").dispatch();

        assert_eq!(response.status(), Status::SeeOther);
        assert_eq!(response.headers().get_one("Location"), Some("/cart"));
        assert!(flash_cookie(&response).contains("error"));
    }

    #[test]
    fn database_failure_returns_to_the_cart_with_an_error() {
        let client = client();
        let response = client.get("/failed").dispatch();

        assert_eq!(response.status(), Status::SeeOther);
        assert_eq!(response.headers().get_one("Location"), Some("/cart"));
        assert!(flash_cookie(&response).contains("error"));
    }
}
