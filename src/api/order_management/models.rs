use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::PgConnection;
use std::fmt::Debug;

use crate::api::product_management::models::Product;
use crate::schema::{order_items, orders, products};

#[derive(Queryable, Identifiable, Debug, Clone)]
#[table_name = "orders"]
pub struct Order {
    pub id: i32,
    pub user_id: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[table_name = "orders"]
pub struct NewOrder {
    pub user_id: i32,
}

#[derive(Queryable, Identifiable, Debug, Clone)]
#[table_name = "order_items"]
pub struct OrderItem {
    pub id: i32,
    pub order_id: i32,
    pub product_id: i32,
}

#[derive(Insertable)]
#[table_name = "order_items"]
pub struct NewOrderItem {
    pub order_id: i32,
    pub product_id: i32,
}

pub(crate) fn has_purchased(c: &PgConnection, user: i32, product: i32) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        order_items::table
            .inner_join(orders::table)
            .filter(orders::user_id.eq(user))
            .filter(order_items::product_id.eq(product)),
    ))
    .get_result(c)
}

/// Which of `products` the user already owns through an earlier order.
pub(crate) fn purchased_among(
    c: &PgConnection,
    user: i32,
    products: &[i32],
) -> QueryResult<Vec<i32>> {
    order_items::table
        .inner_join(orders::table)
        .filter(orders::user_id.eq(user))
        .filter(order_items::product_id.eq_any(products))
        .select(order_items::product_id)
        .load::<i32>(c)
}

/// The user's orders, newest first, each with its products. When `only` is
/// given just that order is loaded.
pub(crate) fn orders_with_products(
    c: &PgConnection,
    user: i32,
    only: Option<i32>,
) -> QueryResult<Vec<(Order, Vec<Product>)>> {
    let mut query = orders::table
        .filter(orders::user_id.eq(user))
        .order((orders::created_at.desc(), orders::id.desc()))
        .into_boxed();
    if let Some(order) = only {
        query = query.filter(orders::id.eq(order));
    }
    let list = query.load::<Order>(c)?;

    let ids: Vec<i32> = list.iter().map(|order| order.id).collect();
    let lines = order_items::table
        .inner_join(products::table)
        .filter(order_items::order_id.eq_any(&ids))
        .order(order_items::id.asc())
        .select((order_items::order_id, products::all_columns))
        .load::<(i32, Product)>(c)?;

    Ok(list
        .into_iter()
        .map(|order| {
            let bought = lines
                .iter()
                .filter(|(order_id, _)| *order_id == order.id)
                .map(|(_, product)| product.clone())
                .collect();
            (order, bought)
        })
        .collect())
}
