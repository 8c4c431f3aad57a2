//! The purchase transaction shared by checkout and single-product buys, and
//! what happens after it commits.

use crate::api::order_management::models::{purchased_among, NewOrder, NewOrderItem, Order};
use crate::api::product_management::models::Product;
use crate::api::user_management::models::User;
use crate::error::MarketError;
use crate::mail::{Mailer, PurchasedLink};
use crate::money::{format_cents, sum_cents};
use crate::schema::{cart_items, order_items, orders, products, users};
use crate::settings::Settings;
use crate::storage;
use crate::tokens::DownloadTokens;
use diesel::prelude::*;
use diesel::PgConnection;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Purchase {
    /// Everything in the buyer's cart.
    Cart,
    /// One product, leaving the cart alone.
    Single(i32),
}

#[derive(Debug)]
pub(crate) struct Receipt {
    pub(crate) order_id: i32,
    pub(crate) products: Vec<Product>,
    pub(crate) total_cents: i64,
}

/// Reasons a set of products cannot be bought, checked in this order.
pub(crate) fn check_purchase(
    buyer: &User,
    items: &[Product],
    owned: &[i32],
) -> Result<i64, MarketError> {
    if items.is_empty() {
        return Err(MarketError::EmptyCart);
    }
    if let Some(product) = items.iter().find(|p| owned.contains(&p.id)) {
        return Err(MarketError::AlreadyPurchased(product.title.clone()));
    }
    if let Some(product) = items.iter().find(|p| p.user_id == buyer.id) {
        return Err(MarketError::OwnProduct(product.title.clone()));
    }

    let total = sum_cents(items.iter().map(|p| p.price_cents))?;
    if buyer.balance_cents < total {
        return Err(MarketError::InsufficientFunds {
            needed: format_cents(total),
            available: format_cents(buyer.balance_cents),
        });
    }
    Ok(total)
}

fn load_items(c: &PgConnection, buyer_id: i32, purchase: Purchase) -> Result<Vec<Product>, MarketError> {
    match purchase {
        Purchase::Cart => Ok(cart_items::table
            .inner_join(products::table)
            .filter(cart_items::user_id.eq(buyer_id))
            .order(cart_items::created_at.asc())
            .select(products::all_columns)
            .load::<Product>(c)?),
        Purchase::Single(product_id) => {
            let product = products::table
                .find(product_id)
                .first::<Product>(c)
                .optional()?
                .ok_or(MarketError::NotFound("product"))?;
            Ok(vec![product])
        }
    }
}

/// Creates the order, debits the buyer and clears the bought products from
/// the cart, all or nothing. The buyer row stays locked until commit so
/// concurrent purchases see the updated balance.
pub(crate) fn purchase(
    c: &PgConnection,
    buyer_id: i32,
    purchase: Purchase,
) -> Result<Receipt, MarketError> {
    c.transaction::<_, MarketError, _>(|| {
        let buyer = users::table
            .find(buyer_id)
            .for_update()
            .first::<User>(c)?;

        let items = load_items(c, buyer_id, purchase)?;
        let ids: Vec<i32> = items.iter().map(|p| p.id).collect();
        let owned = purchased_among(c, buyer_id, &ids)?;
        let total_cents = check_purchase(&buyer, &items, &owned)?;

        let order = diesel::insert_into(orders::table)
            .values(&NewOrder { user_id: buyer_id })
            .get_result::<Order>(c)?;

        let new_items: Vec<NewOrderItem> = ids
            .iter()
            .map(|&product_id| NewOrderItem {
                order_id: order.id,
                product_id,
            })
            .collect();
        diesel::insert_into(order_items::table)
            .values(&new_items)
            .execute(c)?;

        diesel::update(users::table.find(buyer_id))
            .set(users::balance_cents.eq(users::balance_cents - total_cents))
            .execute(c)?;

        diesel::delete(
            cart_items::table
                .filter(cart_items::user_id.eq(buyer_id))
                .filter(cart_items::product_id.eq_any(&ids)),
        )
        .execute(c)?;

        Ok(Receipt {
            order_id: order.id,
            products: items,
            total_cents,
        })
    })
}

/// Issues a download token per product and mails the links to the buyer.
/// Products whose file is missing are logged and left out of the mail.
pub(crate) fn deliver(
    receipt: &Receipt,
    buyer: &User,
    settings: &Settings,
    tokens: &DownloadTokens,
    mailer: &Mailer,
) -> Vec<PurchasedLink> {
    let upload_dir = settings.upload_dir();

    let links: Vec<PurchasedLink> = receipt
        .products
        .iter()
        .filter_map(|product| {
            let issued = storage::resolve(&upload_dir, &product.file_path)
                .ok_or_else(|| MarketError::NotFound("product file"))
                .and_then(|path| tokens.issue(&path));
            match issued {
                Ok(token) => Some(PurchasedLink {
                    title: product.title.clone(),
                    url: settings.download_url(&token),
                }),
                Err(err) => {
                    tracing::warn!(
                        order_id = receipt.order_id,
                        product_id = product.id,
                        error = %err,
                        "Couldn't issue download token"
                    );
                    None
                }
            }
        })
        .collect();

    mailer.dispatch_order_confirmation(buyer.email.clone(), receipt.order_id, links.clone());
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn created() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 2)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap()
    }

    fn buyer(balance_cents: i64) -> User {
        User {
            id: 1,
            username: "buyer".to_string(),
            email: "buyer@example.com".to_string(),
            password_hash: String::new(),
            balance_cents,
            created_at: created(),
        }
    }

    fn product(id: i32, seller: i32, price_cents: i64) -> Product {
        Product {
            id,
            title: format!("Product {}", id),
            description: String::new(),
            price_cents,
            file_path: format!("{}_product_files.zip", id),
            image_path: None,
            user_id: seller,
            created_at: created(),
        }
    }

    #[test]
    fn total_is_the_sum_of_prices() {
        let items = vec![product(1, 2, 500), product(2, 3, 250)];
        assert_eq!(check_purchase(&buyer(1000), &items, &[]).unwrap(), 750);
    }

    #[test]
    fn exact_balance_is_enough() {
        let items = vec![product(1, 2, 1000)];
        assert_eq!(check_purchase(&buyer(1000), &items, &[]).unwrap(), 1000);
    }

    #[test]
    fn empty_cart_is_refused() {
        assert!(matches!(
            check_purchase(&buyer(1000), &[], &[]),
            Err(MarketError::EmptyCart)
        ));
    }

    #[test]
    fn already_purchased_names_the_product() {
        let items = vec![product(1, 2, 100), product(2, 2, 100)];
        match check_purchase(&buyer(1000), &items, &[2]) {
            Err(MarketError::AlreadyPurchased(title)) => assert_eq!(title, "Product 2"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn own_products_cannot_be_bought() {
        let items = vec![product(1, 1, 100)];
        assert!(matches!(
            check_purchase(&buyer(1000), &items, &[]),
            Err(MarketError::OwnProduct(_))
        ));
    }

    #[test]
    fn insufficient_funds_reports_amounts() {
        let items = vec![product(1, 2, 1500)];
        let err = check_purchase(&buyer(1000), &items, &[]).unwrap_err();

        assert_eq!(
            err.to_string(),
            "insufficient funds: the order costs 15.00, your balance is 10.00"
        );
        assert_eq!(err.status().code, 400);
    }

    #[test]
    fn overflowing_total_is_refused_not_wrapped() {
        let huge = 4_611_686_018_427_387_904;
        let items = vec![product(1, 2, huge), product(2, 3, huge)];

        match check_purchase(&buyer(0), &items, &[]) {
            Err(MarketError::Validation(msg)) => assert_eq!(msg, "Order total is too large"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn delivery_skips_missing_files() {
        use crate::settings::tests::settings_from;
        use crate::storage::tests::scratch_dir;
        use chrono::Duration;

        let dir = scratch_dir("deliver");
        std::fs::write(dir.join("1_product_files.zip"), b"zip").unwrap();
        let settings = settings_from(&[
            ("UPLOAD_FOLDER", dir.to_str().unwrap()),
            ("BASE_URL", "https://shop.example"),
        ]);
        let tokens = DownloadTokens::new(Duration::hours(24));
        let mailer = Mailer::from_settings(&settings_from(&[]));
        let receipt = Receipt {
            order_id: 5,
            products: vec![product(1, 2, 100), product(2, 2, 100)],
            total_cents: 200,
        };

        // Rejected before the mailer spawns a task; there is no runtime here.
        let mut buyer = buyer(0);
        buyer.email = "not-an-email".to_string();
        let links = deliver(&receipt, &buyer, &settings, &tokens, &mailer);

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].title, "Product 1");
        assert!(links[0].url.starts_with("https://shop.example/download/"));
        assert_eq!(tokens.len(), 1);

        std::fs::remove_dir_all(dir).unwrap();
    }

    mod with_database {
        use super::*;
        use crate::api::cart_management::models::NewCartItem;
        use crate::api::product_management::models::NewProduct;
        use crate::api::user_management::models::NewUser;
        use crate::db::tests::test_connection;

        fn insert_user(c: &PgConnection, name: &str, balance_cents: i64) -> i32 {
            let id = diesel::insert_into(users::table)
                .values(&NewUser {
                    username: name.to_string(),
                    email: format!("{}@example.com", name),
                    password_hash: "unused".to_string(),
                })
                .returning(users::id)
                .get_result::<i32>(c)
                .unwrap();
            diesel::update(users::table.find(id))
                .set(users::balance_cents.eq(balance_cents))
                .execute(c)
                .unwrap();
            id
        }

        fn insert_product(c: &PgConnection, seller: i32, price_cents: i64) -> i32 {
            diesel::insert_into(products::table)
                .values(&NewProduct {
                    title: format!("Pack at {}", price_cents),
                    description: String::new(),
                    price_cents,
                    file_path: "1_product_files.zip".to_string(),
                    image_path: None,
                    user_id: seller,
                })
                .returning(products::id)
                .get_result::<i32>(c)
                .unwrap()
        }

        fn add_to_cart(c: &PgConnection, user_id: i32, product_id: i32) {
            diesel::insert_into(cart_items::table)
                .values(&NewCartItem {
                    user_id,
                    product_id,
                })
                .execute(c)
                .unwrap();
        }

        fn balance(c: &PgConnection, user_id: i32) -> i64 {
            users::table
                .find(user_id)
                .select(users::balance_cents)
                .first(c)
                .unwrap()
        }

        fn order_count(c: &PgConnection, user_id: i32) -> i64 {
            orders::table
                .filter(orders::user_id.eq(user_id))
                .count()
                .get_result(c)
                .unwrap()
        }

        fn cart_of(c: &PgConnection, user_id: i32) -> Vec<i32> {
            cart_items::table
                .filter(cart_items::user_id.eq(user_id))
                .select(cart_items::product_id)
                .order(cart_items::product_id.asc())
                .load(c)
                .unwrap()
        }

        #[test]
        fn checkout_creates_order_debits_and_clears_cart() {
            let c = match test_connection() {
                Some(c) => c,
                None => return,
            };
            c.test_transaction::<_, MarketError, _>(|| {
                let seller = insert_user(&c, "checkout-seller", 0);
                let buyer = insert_user(&c, "checkout-buyer", 1000);
                let other = insert_user(&c, "checkout-other", 0);
                let first = insert_product(&c, seller, 300);
                let second = insert_product(&c, seller, 200);
                add_to_cart(&c, buyer, first);
                add_to_cart(&c, buyer, second);
                add_to_cart(&c, other, first);

                let receipt = purchase(&c, buyer, Purchase::Cart)?;

                assert_eq!(receipt.total_cents, 500);
                assert_eq!(receipt.products.len(), 2);
                let bought: i64 = order_items::table
                    .filter(order_items::order_id.eq(receipt.order_id))
                    .count()
                    .get_result(&c)?;
                assert_eq!(bought, 2);
                assert_eq!(balance(&c, buyer), 500);
                assert!(cart_of(&c, buyer).is_empty());
                assert_eq!(cart_of(&c, other), vec![first]);
                Ok(())
            });
        }

        #[test]
        fn empty_cart_leaves_no_trace() {
            let c = match test_connection() {
                Some(c) => c,
                None => return,
            };
            c.test_transaction::<_, MarketError, _>(|| {
                let buyer = insert_user(&c, "empty-cart-buyer", 1000);

                assert!(matches!(
                    purchase(&c, buyer, Purchase::Cart),
                    Err(MarketError::EmptyCart)
                ));
                assert_eq!(order_count(&c, buyer), 0);
                assert_eq!(balance(&c, buyer), 1000);
                Ok(())
            });
        }

        #[test]
        fn refused_checkout_rolls_back() {
            let c = match test_connection() {
                Some(c) => c,
                None => return,
            };
            c.test_transaction::<_, MarketError, _>(|| {
                let seller = insert_user(&c, "poor-seller", 0);
                let buyer = insert_user(&c, "poor-buyer", 100);
                let product = insert_product(&c, seller, 500);
                add_to_cart(&c, buyer, product);

                assert!(matches!(
                    purchase(&c, buyer, Purchase::Cart),
                    Err(MarketError::InsufficientFunds { .. })
                ));
                assert_eq!(order_count(&c, buyer), 0);
                assert_eq!(balance(&c, buyer), 100);
                assert_eq!(cart_of(&c, buyer), vec![product]);
                Ok(())
            });
        }

        #[test]
        fn single_buy_keeps_the_rest_of_the_cart() {
            let c = match test_connection() {
                Some(c) => c,
                None => return,
            };
            c.test_transaction::<_, MarketError, _>(|| {
                let seller = insert_user(&c, "single-seller", 0);
                let buyer = insert_user(&c, "single-buyer", 1000);
                let wanted = insert_product(&c, seller, 400);
                let later = insert_product(&c, seller, 100);
                add_to_cart(&c, buyer, wanted);
                add_to_cart(&c, buyer, later);

                let receipt = purchase(&c, buyer, Purchase::Single(wanted))?;

                assert_eq!(receipt.total_cents, 400);
                assert_eq!(balance(&c, buyer), 600);
                assert_eq!(cart_of(&c, buyer), vec![later]);

                assert!(matches!(
                    purchase(&c, buyer, Purchase::Single(wanted)),
                    Err(MarketError::AlreadyPurchased(_))
                ));
                assert_eq!(balance(&c, buyer), 600);
                Ok(())
            });
        }
    }
}
