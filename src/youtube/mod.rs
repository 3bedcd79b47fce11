pub mod auth;
pub mod playlist;
