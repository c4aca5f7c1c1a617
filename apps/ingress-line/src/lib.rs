//! LINE webhook ingress.
//!
//! Accepts signed deliveries on a single endpoint, acknowledges them at once
//! and answers each event in the background through the reply API.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
mod main_logic;
pub mod rate;
pub mod reqid;

pub use config::{IngressConfig, RateLimitConfig};
pub use dispatch::{DispatchReport, Dispatcher};
pub use error::WebhookError;
pub use http::{AppState, build_router};
pub use main_logic::run;
