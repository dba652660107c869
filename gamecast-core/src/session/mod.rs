//! Session relay: directory, connection lifecycle, fanout and eviction

pub mod broadcast;
pub mod directory;
pub mod gateway;
pub mod link;
pub mod reaper;
pub mod record;

pub use broadcast::{fanout, publish, FanoutReport};
pub use directory::{IdGenerator, SessionDirectory};
pub use gateway::{ConnectionGateway, HostSession, InboundStream, LoopExit, ViewerSession};
pub use link::{ClientLink, FrameSink, LinkError, LinkId, LinkReceiver};
pub use reaper::{EvictionPolicy, Reaper, SweepReport};
pub use record::{HostConnectionState, SessionRecord};
