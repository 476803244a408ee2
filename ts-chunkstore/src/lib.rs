//! Storage-tier (S-node) replication core: chunk blob storage, the in-memory
//! chunk index and tombstone set, chunk-tier gossip and anti-entropy, and the
//! HTTP heartbeat that reports this node to the coordinator tier.

pub mod anti_entropy;
pub mod blobstore;
pub mod checksum;
pub mod gossip;
pub mod heartbeat;
pub mod index;
pub mod rpc;
