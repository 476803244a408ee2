//! Thin re-export surface for the two daemon binaries; the replication logic
//! itself lives in `ts-meta` (coordinator tier) and `ts-chunkstore` (storage
//! tier). Nothing here talks to a socket or a disk on its own.

pub use ts_api_types as api_types;
pub use ts_chunkstore as chunkstore;
pub use ts_config as config;
pub use ts_discovery as discovery;
pub use ts_meta as meta;
pub use ts_tools as tools;
pub use ts_wire as wire;
