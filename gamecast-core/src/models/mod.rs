pub mod id;
pub mod message;
pub mod state;

pub use id::{generate_id, SessionId};
pub use message::{HostFrame, ServerMessage};
pub use state::StateBlob;
