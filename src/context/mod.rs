pub mod assembler;
pub mod buffer;
pub mod store;

pub use assembler::{assemble, assemble_recent, assemble_topic, AssembleOptions, AssembledContext};
pub use buffer::{ContextBuffer, ContextBufferConfig};
pub use store::{run_store, ContextStore, ContextStoreConfig};
