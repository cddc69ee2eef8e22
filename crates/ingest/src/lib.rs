//! Head subscriptions and block ingestion
//!
//! Features:
//! - One subscription record per network, released only by its manager
//! - Bounded producer/consumer queue between the head stream and ingestion
//! - Bounded timeouts on subscribe and header fetches

pub mod connection;
pub mod ingestor;

pub use connection::{ConnectionManager, ConnectionStats};
pub use ingestor::BlockIngestor;
