pub mod elastic;
pub mod memory;

pub use elastic::{ElasticConfig, ElasticEngine};
pub use memory::MemoryEngine;
