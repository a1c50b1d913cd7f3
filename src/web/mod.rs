pub mod handlers;
pub mod proxy;
pub mod routes;

pub use routes::{build_gateway, create_router};
