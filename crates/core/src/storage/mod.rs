pub mod db;
pub mod encryption;
pub mod models;
pub mod schema;
pub mod store;
