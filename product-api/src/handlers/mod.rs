pub mod app;
mod error;
mod prices;
mod products;

pub use app::{add_routes, AppState};
pub use error::ApiError;
