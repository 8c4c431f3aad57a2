use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::PgConnection;
use std::fmt::Debug;

use crate::schema::cart_items;

#[derive(Queryable, Identifiable, Debug, Clone)]
#[table_name = "cart_items"]
pub struct CartItem {
    pub id: i32,
    pub user_id: i32,
    pub product_id: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[table_name = "cart_items"]
pub struct NewCartItem {
    pub user_id: i32,
    pub product_id: i32,
}

pub(crate) fn in_cart(c: &PgConnection, user: i32, product: i32) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        cart_items::table
            .filter(cart_items::user_id.eq(user))
            .filter(cart_items::product_id.eq(product)),
    ))
    .get_result(c)
}
