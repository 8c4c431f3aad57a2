pub mod cart;
pub mod models;
