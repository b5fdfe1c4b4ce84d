//! Consumer delivery queues.

mod consumer;

pub use consumer::{ConsumerSink, ConsumerStream, Offer, QueuePolicy, consumer_channel};
