pub mod get_product;
pub mod list;
pub mod models;
pub mod upload;
