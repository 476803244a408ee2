pub mod config;
mod env;
pub mod identity;

pub use config::{CoordinatorConfig, StorageConfig};
pub use identity::load_or_create_node_id;
