pub mod auth;
pub mod health;
pub mod roles;
pub mod tasks;
pub mod users;
