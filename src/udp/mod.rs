//! UDP transport: discovery announcements and the peer registry

pub mod discovery;
pub mod registry;

pub use discovery::{broadcast_presence, collect_peers, Announcement, DiscoveryListener};
pub use registry::{DiscoveredPeer, PeerRegistry};
