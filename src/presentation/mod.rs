// Presentation layer - axum handlers over the shared session
pub mod app_state;
pub mod handlers;
