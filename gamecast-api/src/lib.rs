// Gamecast API Library
//
// Provides the HTTP and WebSocket surface of the relay

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppState};
