use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::{Array, BigInt, Text};
use diesel::PgConnection;
use serde::Serialize;
use std::fmt::Debug;

use crate::money::format_cents;
use crate::schema::{product_tags, products, tags};
use crate::validation::is_image_file;

sql_function!(fn lower(x: Text) -> Text);

#[derive(Queryable, QueryableByName, Identifiable, Debug, Clone)]
#[table_name = "products"]
pub struct Product {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub file_path: String,
    pub image_path: Option<String>,
    pub user_id: i32,
    pub created_at: NaiveDateTime,
}

impl Product {
    /// The image shown for the product: its own image, or the product file
    /// itself when that is a picture.
    pub fn display_image(&self) -> Option<&str> {
        match &self.image_path {
            Some(path) => Some(path.as_str()),
            None if is_image_file(&self.file_path) => Some(self.file_path.as_str()),
            None => None,
        }
    }
}

#[derive(Insertable)]
#[table_name = "products"]
pub struct NewProduct {
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub file_path: String,
    pub image_path: Option<String>,
    pub user_id: i32,
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct Tag {
    pub id: i32,
    pub name: String,
}

#[derive(Insertable)]
#[table_name = "tags"]
pub struct NewTag<'a> {
    pub name: &'a str,
}

#[derive(Insertable)]
#[table_name = "product_tags"]
pub struct NewProductTag {
    pub product_id: i32,
    pub tag_id: i32,
}

#[derive(Serialize, Debug, Clone)]
pub struct ProductOut {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub price: String,
    pub image_url: Option<String>,
    pub user_id: i32,
    pub created_at: String,
    pub tags: Vec<Tag>,
}

impl ProductOut {
    pub fn new(product: &Product, tags: Vec<Tag>) -> ProductOut {
        ProductOut {
            id: product.id,
            title: product.title.clone(),
            description: product.description.clone(),
            price_cents: product.price_cents,
            price: format_cents(product.price_cents),
            image_url: product
                .display_image()
                .map(|_| format!("/images/products/{}", product.id)),
            user_id: product.user_id,
            created_at: product.created_at.format("%Y-%m-%d %H:%M").to_string(),
            tags,
        }
    }
}

pub(crate) fn all_products(c: &PgConnection) -> QueryResult<Vec<Product>> {
    products::table
        .order(products::created_at.desc())
        .load::<Product>(c)
}

/// Products carrying every one of `names`, compared case-insensitively.
pub(crate) fn products_with_all_tags(
    c: &PgConnection,
    names: &[String],
) -> QueryResult<Vec<Product>> {
    let lowered: Vec<String> = names.iter().map(|name| name.to_lowercase()).collect();
    let wanted = lowered.len() as i64;

    diesel::sql_query(
        "SELECT p.* FROM products p \
         JOIN product_tags pt ON pt.product_id = p.id \
         JOIN tags t ON t.id = pt.tag_id \
         WHERE lower(t.name) = ANY($1) \
         GROUP BY p.id \
         HAVING COUNT(DISTINCT lower(t.name)) = $2 \
         ORDER BY p.created_at DESC",
    )
    .bind::<Array<Text>, _>(lowered)
    .bind::<BigInt, _>(wanted)
    .load::<Product>(c)
}

pub(crate) fn product_tags_of(c: &PgConnection, product: i32) -> QueryResult<Vec<Tag>> {
    tags::table
        .inner_join(product_tags::table)
        .filter(product_tags::product_id.eq(product))
        .select((tags::id, tags::name))
        .order(tags::name.asc())
        .load::<Tag>(c)
}

/// Attaches tags to each product. One query for all tags of the page.
pub(crate) fn with_tags(c: &PgConnection, list: Vec<Product>) -> QueryResult<Vec<ProductOut>> {
    let ids: Vec<i32> = list.iter().map(|product| product.id).collect();
    let pairs = product_tags::table
        .inner_join(tags::table)
        .filter(product_tags::product_id.eq_any(&ids))
        .select((product_tags::product_id, (tags::id, tags::name)))
        .order(tags::name.asc())
        .load::<(i32, Tag)>(c)?;

    Ok(list
        .iter()
        .map(|product| {
            let tags = pairs
                .iter()
                .filter(|(product_id, _)| *product_id == product.id)
                .map(|(_, tag)| tag.clone())
                .collect();
            ProductOut::new(product, tags)
        })
        .collect())
}

pub(crate) fn all_tags(c: &PgConnection) -> QueryResult<Vec<Tag>> {
    tags::table.order(tags::name.asc()).load::<Tag>(c)
}

/// Id of the tag called `name` (any casing), creating it if needed. A
/// concurrent upload may create the same tag first; the insert then does
/// nothing and the lookup picks up its row.
pub(crate) fn find_or_create_tag(c: &PgConnection, name: &str) -> QueryResult<i32> {
    let lookup = || {
        tags::table
            .filter(lower(tags::name).eq(name.to_lowercase()))
            .select(tags::id)
            .first::<i32>(c)
    };

    if let Some(id) = lookup().optional()? {
        return Ok(id);
    }

    diesel::insert_into(tags::table)
        .values(&NewTag { name })
        .on_conflict_do_nothing()
        .execute(c)?;
    lookup()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn product(file_path: &str, image_path: Option<&str>) -> Product {
        Product {
            id: 9,
            title: "Synth presets".to_string(),
            description: "Fifty patches".to_string(),
            price_cents: 1999,
            file_path: file_path.to_string(),
            image_path: image_path.map(str::to_string),
            user_id: 2,
            created_at: NaiveDate::from_ymd_opt(2024, 4, 2)
                .and_then(|d| d.and_hms_opt(9, 30, 0))
                .unwrap(),
        }
    }

    #[test]
    fn image_falls_back_to_picture_files() {
        assert_eq!(
            product("1_product_files.zip", Some("1_image.png")).display_image(),
            Some("1_image.png")
        );
        assert_eq!(product("cover.JPG", None).display_image(), Some("cover.JPG"));
        assert_eq!(product("1_product_files.zip", None).display_image(), None);
    }

    #[test]
    fn output_formats_price_and_image_url() {
        let tags = vec![Tag {
            id: 1,
            name: "audio".to_string(),
        }];
        let out = ProductOut::new(&product("1_product_files.zip", Some("1_image.png")), tags);

        assert_eq!(out.price, "19.99");
        assert_eq!(out.image_url.as_deref(), Some("/images/products/9"));
        assert_eq!(out.created_at, "2024-04-02 09:30");
        assert_eq!(out.tags[0].name, "audio");

        let out = ProductOut::new(&product("1_product_files.zip", None), vec![]);
        assert!(out.image_url.is_none());
    }

    #[test]
    fn tags_are_shared_across_casing() {
        let c = match crate::db::tests::test_connection() {
            Some(c) => c,
            None => return,
        };
        c.test_transaction::<_, diesel::result::Error, _>(|| {
            let created = find_or_create_tag(&c, "Chiptune-Test")?;
            assert_eq!(find_or_create_tag(&c, "chiptune-test")?, created);

            let rows: i64 = tags::table
                .filter(lower(tags::name).eq("chiptune-test"))
                .count()
                .get_result(&c)?;
            assert_eq!(rows, 1);
            Ok(())
        });
    }
}
