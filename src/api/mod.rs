//! HTTP + WebSocket surface over the adapters

pub mod extractor;
pub mod handlers;
pub mod routes;
pub mod ws_handlers;

pub use extractor::{Principal, OWNER_HEADER};
pub use handlers::{ApiState, AppError};
pub use routes::create_router;
