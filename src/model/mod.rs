pub mod apperror;
pub mod config;
pub mod country;
pub mod models;
