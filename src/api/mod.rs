pub mod cart_management;
pub mod download_management;
pub mod home;
pub mod order_management;
pub mod product_management;
pub mod user_management;
