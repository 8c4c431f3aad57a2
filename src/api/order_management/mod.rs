pub mod buy;
pub mod checkout;
pub mod models;
pub mod purchase;
pub mod success;
