pub mod app;
pub mod authz;
pub mod db;
pub mod email;
pub mod errors;
pub mod jwt;
pub mod models;
pub mod pagination;
pub mod permissions;
pub mod routes;
pub mod utils;

// Re-export commonly used items for tests
pub use app::create_app;
