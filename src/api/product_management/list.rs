use crate::api::product_management::models::{
    all_products, all_tags, products_with_all_tags, with_tags, ProductOut, Tag,
};
use crate::api::user_management::models::CurrentUser;
use crate::db::DbConn;
use crate::error::{ErrorResponse, MarketError};
use crate::pages::Page;
use crate::validation::tag_filter;
use diesel::PgConnection;
use rocket::http::Status;
use rocket::request::FlashMessage;
use rocket::serde::json::Json;
use rocket_dyn_templates::Template;
use serde::Serialize;

#[derive(Serialize)]
struct ProductsPage {
    products: Vec<ProductOut>,
    tags: Vec<Tag>,
    selected_tags: Vec<String>,
    tag_query: String,
}

#[derive(Debug, PartialEq)]
enum Catalog<'a> {
    All,
    WithAllTags(&'a [String]),
    Nothing,
}

impl<'a> Catalog<'a> {
    fn for_filter(filter: Option<&'a [String]>) -> Catalog<'a> {
        match filter {
            None => Catalog::All,
            Some([]) => Catalog::Nothing,
            Some(names) => Catalog::WithAllTags(names),
        }
    }
}

fn load_catalog(
    c: &PgConnection,
    filter: Option<&[String]>,
) -> Result<Vec<ProductOut>, MarketError> {
    let list = match Catalog::for_filter(filter) {
        Catalog::All => all_products(c)?,
        Catalog::WithAllTags(names) => products_with_all_tags(c, names)?,
        Catalog::Nothing => return Ok(Vec::new()),
    };
    Ok(with_tags(c, list)?)
}

#[get("/products?<tags>")]
pub(crate) async fn products_page(
    tags: Option<String>,
    viewer: CurrentUser,
    conn: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template, MarketError> {
    let filter = tag_filter(tags.as_deref().unwrap_or_default())?;
    let selected_tags = filter.clone().unwrap_or_default();

    let (products, tags) = conn
        .run(move |c| {
            let products = load_catalog(c, filter.as_deref())?;
            let tags = all_tags(c)?;
            Ok::<_, MarketError>((products, tags))
        })
        .await?;

    Ok(Page::new(
        viewer.user(),
        ProductsPage {
            products,
            tags,
            tag_query: selected_tags.join(","),
            selected_tags,
        },
    )
    .flash(flash)
    .render("products"))
}

#[get("/products?<tags>")]
pub(crate) async fn api_products(
    tags: Option<String>,
    conn: DbConn,
) -> Result<Json<Vec<ProductOut>>, ErrorResponse> {
    let filter = tag_filter(tags.as_deref().unwrap_or_default())?;

    let out = conn
        .run(move |c| load_catalog(c, filter.as_deref()))
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "Couldn't load products");
            ErrorResponse::new(Status { code: 500 }, "Couldn't load products".to_string())
        })?;

    Ok(Json(out))
}

#[get("/tags")]
pub(crate) async fn api_tags(conn: DbConn) -> Result<Json<Vec<Tag>>, ErrorResponse> {
    let out = conn
        .run(|c| all_tags(c))
        .await
        .map_err(|_| ErrorResponse::new(Status { code: 500 }, "Couldn't load tags".to_string()))?;

    Ok(Json(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_filter_lists_everything() {
        let filter = tag_filter("").unwrap();
        assert_eq!(Catalog::for_filter(filter.as_deref()), Catalog::All);
    }

    #[test]
    fn filter_of_only_invalid_names_lists_nothing() {
        let long = "x".repeat(31);
        for raw in &[",", long.as_str()] {
            let filter = tag_filter(raw).unwrap();
            assert_eq!(Catalog::for_filter(filter.as_deref()), Catalog::Nothing);
        }
    }

    #[test]
    fn valid_names_are_queried() {
        let filter = tag_filter("audio,,presets").unwrap();
        let names = ["audio".to_string(), "presets".to_string()];
        assert_eq!(
            Catalog::for_filter(filter.as_deref()),
            Catalog::WithAllTags(&names)
        );
    }
}
