//! HTTP surface of the query service

pub mod auth;
pub mod middleware;
pub mod routes;
pub mod server;

pub use auth::JwtAuth;
pub use middleware::AuthState;
pub use routes::AppState;
pub use server::ApiServer;
