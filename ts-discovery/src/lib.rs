pub mod discovery;
pub mod dns;
pub mod peer_cache;

pub use discovery::{discover_peers, spawn_background_refresh};
pub use dns::discover_peers_dns_only;
pub use peer_cache::{PeerCache, PeerCacheEntry};
