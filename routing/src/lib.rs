//! Topic-based publish/subscribe routing for unstructured overlays,
//! after the Quasar algorithm.
//!
//! Each node summarizes which topics are reachable through each neighbor
//! in an attenuated Bloom filter vector: level 0 is the neighbor's own
//! subscriptions, level i the union of its neighbors' level i-1. Nodes
//! exchange these summaries periodically. An event is delivered to local
//! subscribers and flooded when the topic matches, forwarded to the
//! closest informed neighbor when a filter matches (avoiding neighbors
//! whose filters already know one of the event's publishers), and handed
//! to a random neighbor otherwise, so events make progress even before
//! filters converge.
//!
//! The overlay transport, peer identity and subscriber sinks are
//! consumed through traits; see [`Overlay`] and [`EventSink`].

pub mod config;
pub mod digest;
pub mod event;
pub mod filter;
pub mod history;
pub mod node;
pub mod overlay;
pub mod peers;
pub mod subscriptions;
pub mod taps;
pub mod update;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use digest::Digest;
pub use event::Event;
pub use filter::{Filter, FilterParams};
pub use libp2p_identity::PeerId;
pub use node::Node;
pub use overlay::{Overlay, OverlayInbound};
pub use subscriptions::EventSink;
pub use taps::{TapRecord, Taps};
pub use update::FilterUpdate;
