pub mod health;
pub mod search;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{health_handler, metrics_handler};
pub use search::music_search_handler;
pub use websocket::websocket_handler;
