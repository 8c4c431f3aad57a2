use crate::api::order_management::models::orders_with_products;
use crate::api::product_management::models::{with_tags, Product, ProductOut};
use crate::api::user_management::models::UserLoggedIn;
use crate::db::DbConn;
use crate::error::MarketError;
use crate::money::{format_cents, sum_cents};
use crate::pages::Page;
use crate::password::{hash_password, verify_password};
use crate::schema::{products, users};
use crate::settings::Settings;
use crate::validation::validate_password;
use diesel::prelude::*;
use rocket::form::Form;
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::tokio::task;
use rocket::State;
use rocket_dyn_templates::Template;
use serde::Serialize;

#[derive(Serialize)]
struct OrderOut {
    id: i32,
    created_at: String,
    total: String,
    products: Vec<ProductOut>,
}

#[derive(Serialize)]
struct ProfilePage {
    products: Vec<ProductOut>,
    orders: Vec<OrderOut>,
    earn_amount: String,
}

#[get("/profile")]
pub(crate) async fn show_profile(
    user: UserLoggedIn,
    conn: DbConn,
    settings: &State<Settings>,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template, MarketError> {
    let user_id = user.0.id;

    let (products, orders) = conn
        .run(move |c| {
            let own = products::table
                .filter(products::user_id.eq(user_id))
                .order(products::created_at.desc())
                .load::<Product>(c)?;
            let products = with_tags(c, own)?;
            let orders = orders_with_products(c, user_id, None)?;
            Ok::<_, MarketError>((products, orders))
        })
        .await?;

    let orders = orders
        .into_iter()
        .map(|(order, bought)| {
            Ok(OrderOut {
                id: order.id,
                created_at: order.created_at.format("%Y-%m-%d %H:%M").to_string(),
                total: format_cents(sum_cents(bought.iter().map(|p| p.price_cents))?),
                products: bought.iter().map(|p| ProductOut::new(p, Vec::new())).collect(),
            })
        })
        .collect::<Result<Vec<_>, MarketError>>()?;

    Ok(Page::new(
        Some(&user.0),
        ProfilePage {
            products,
            orders,
            earn_amount: format_cents(settings.earn_amount_cents),
        },
    )
    .flash(flash)
    .render("profile"))
}

#[derive(FromForm)]
pub struct ChangePasswordForm {
    current_password: String,
    new_password: String,
    confirm_password: String,
}

fn new_password_hash(user_hash: &str, form: &ChangePasswordForm) -> Result<String, MarketError> {
    if !verify_password(user_hash, &form.current_password)? {
        return Err(MarketError::Validation(
            "Current password is incorrect".to_string(),
        ));
    }
    if form.new_password != form.confirm_password {
        return Err(MarketError::Validation(
            "New passwords do not match".to_string(),
        ));
    }
    validate_password(&form.new_password)?;
    hash_password(&form.new_password)
}

#[post("/profile/change-password", data = "<form>")]
pub(crate) async fn change_password(
    form: Form<ChangePasswordForm>,
    user: UserLoggedIn,
    conn: DbConn,
) -> Flash<Redirect> {
    let user_id = user.0.id;
    let stored_hash = user.0.password_hash.clone();
    let form = form.into_inner();

    let hashed = task::spawn_blocking(move || new_password_hash(&stored_hash, &form))
        .await
        .map_err(|err| MarketError::Internal(err.to_string()))
        .and_then(|hashed| hashed);

    let result = match hashed {
        Ok(hashed) => conn
            .run(move |c| {
                diesel::update(users::table.find(user_id))
                    .set(users::password_hash.eq(hashed))
                    .execute(c)
            })
            .await
            .map(|_| ())
            .map_err(MarketError::from),
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => {
            tracing::info!(user_id, "password changed");
            Flash::success(Redirect::to("/profile"), "Password changed.")
        }
        Err(err) => {
            if err.status().code >= 500 {
                tracing::error!(error = %err, user_id, "Couldn't change password");
            }
            Flash::error(Redirect::to("/profile"), err.public_message())
        }
    }
}

#[post("/earn-money")]
pub(crate) async fn earn_money(
    user: UserLoggedIn,
    conn: DbConn,
    settings: &State<Settings>,
) -> Result<Flash<Redirect>, MarketError> {
    let user_id = user.0.id;
    let amount = settings.earn_amount_cents;

    let balance = conn
        .run(move |c| {
            diesel::update(users::table.find(user_id))
                .set(users::balance_cents.eq(users::balance_cents + amount))
                .returning(users::balance_cents)
                .get_result::<i64>(c)
        })
        .await?;

    tracing::info!(user_id, amount, balance, "balance credited");
    Ok(Flash::success(
        Redirect::to("/profile"),
        format!(
            "You earned {} credits! Your balance is now {}.",
            format_cents(amount),
            format_cents(balance)
        ),
    ))
}
