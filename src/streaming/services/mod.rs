//! Stream session and room services.

mod manager;
mod rooms;

pub use manager::{ProducerHandle, StreamChannelManager};
pub use rooms::RoomRegistry;
