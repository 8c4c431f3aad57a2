use crate::api::order_management::purchase::{deliver, purchase, Purchase};
use crate::api::user_management::models::UserLoggedIn;
use crate::db::DbConn;
use crate::error::MarketError;
use crate::mail::Mailer;
use crate::settings::Settings;
use crate::tokens::DownloadTokens;
use rocket::response::{Flash, Redirect};
use rocket::State;

/// Runs the purchase for the signed-in user and hands out the download links.
/// Returns the new order id.
pub(crate) async fn complete_purchase(
    user: &UserLoggedIn,
    conn: &DbConn,
    what: Purchase,
    settings: &Settings,
    tokens: &DownloadTokens,
    mailer: &Mailer,
) -> Result<i32, MarketError> {
    let buyer_id = user.0.id;
    let receipt = conn.run(move |c| purchase(c, buyer_id, what)).await?;

    tracing::info!(
        order_id = receipt.order_id,
        user_id = buyer_id,
        products = receipt.products.len(),
        total_cents = receipt.total_cents,
        "order placed"
    );

    deliver(&receipt, &user.0, settings, tokens, mailer);
    Ok(receipt.order_id)
}

pub(crate) fn success_redirect(order_id: i32) -> Redirect {
    Redirect::to(format!("/order/success?order={}", order_id))
}

#[post("/checkout")]
pub(crate) async fn checkout(
    user: UserLoggedIn,
    conn: DbConn,
    settings: &State<Settings>,
    tokens: &State<DownloadTokens>,
    mailer: &State<Mailer>,
) -> Result<Redirect, Flash<Redirect>> {
    match complete_purchase(&user, &conn, Purchase::Cart, settings, tokens, mailer).await {
        Ok(order_id) => Ok(success_redirect(order_id)),
        Err(err) => {
            if err.status().code >= 500 {
                tracing::error!(error = %err, user_id = user.0.id, "checkout failed");
            } else {
                tracing::debug!(error = %err, user_id = user.0.id, "checkout refused");
            }
            Err(Flash::error(
                Redirect::to("/cart"),
                format!("Checkout failed: {}", err.public_message()),
            ))
        }
    }
}
