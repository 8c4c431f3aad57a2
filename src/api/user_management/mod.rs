pub mod login;
pub mod models;
pub mod oauth;
pub mod profile;
pub mod register;
pub mod sessions;
