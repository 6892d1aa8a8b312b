pub mod db;
pub mod signed_url;
pub mod store;
pub mod types;
