//! HTTP surface
//!
//! - [`api`] - Route table and handlers
//! - [`auth`] - Bearer token extractors
//! - [`server`] - Shared state and the server lifecycle
//! - [`ui`] - Preview page

pub mod api;
pub mod auth;
#[allow(clippy::module_inception)]
pub mod server;
pub mod ui;

pub use api::{create_router, MessageResponse, NO_QUESTION_MESSAGE};
pub use auth::{AdminAuth, AuthError, Role, TokenRegistry, UserIdentity};
pub use server::{AppState, QuizServer, ServerError, ServerInfo};
pub use ui::PreviewPage;
