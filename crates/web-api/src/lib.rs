//! Web API 层。
//!
//! 提供 Axum 路由：`/ws` 实时通道，以及供外部协作方调用的内部 HTTP 接口。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
