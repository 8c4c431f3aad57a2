use crate::api::order_management::models::orders_with_products;
use crate::api::product_management::models::ProductOut;
use crate::api::user_management::models::UserLoggedIn;
use crate::db::DbConn;
use crate::error::MarketError;
use crate::money::{format_cents, sum_cents};
use crate::pages::Page;
use rocket_dyn_templates::Template;
use serde::Serialize;

#[derive(Serialize)]
struct SuccessPage {
    order_id: Option<i32>,
    products: Vec<ProductOut>,
    total: String,
}

#[get("/order/success?<order>")]
pub(crate) async fn order_success(
    order: Option<i32>,
    user: UserLoggedIn,
    conn: DbConn,
) -> Result<Template, MarketError> {
    let user_id = user.0.id;

    let found = match order {
        Some(order) => conn
            .run(move |c| orders_with_products(c, user_id, Some(order)))
            .await?
            .pop(),
        None => None,
    };

    let page = match found {
        Some((order, bought)) => SuccessPage {
            order_id: Some(order.id),
            total: format_cents(sum_cents(bought.iter().map(|p| p.price_cents))?),
            products: bought.iter().map(|p| ProductOut::new(p, Vec::new())).collect(),
        },
        None => SuccessPage {
            order_id: None,
            products: Vec::new(),
            total: format_cents(0),
        },
    };

    Ok(Page::new(Some(&user.0), page).render("order_success"))
}
