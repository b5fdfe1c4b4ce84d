//! Domain model for stream sessions.

mod error;
mod event;
mod ids;
mod state;

pub use error::{StreamDomainError, StreamError};
pub use event::{Delivery, DeliveryOrigin, StreamEvent};
pub use ids::{ConnectionId, ConsumerId, RoomName, StreamSessionId};
pub use state::StreamState;
