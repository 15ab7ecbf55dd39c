pub mod cipher;
pub mod client;
pub mod codec;
pub mod directory;
pub mod document;
pub mod factory;
pub mod memory;
pub mod store;
pub mod valkey;

pub use cipher::{CipherError, CipherKey};
pub use client::{CacheBackend, CacheError, CacheResult};
pub use factory::{BackendKind, BackendSettings, build_backend};
pub use memory::MemoryBackend;
pub use store::{CacheSettings, CacheStore, Lookup, Miss, ReadOptions, WriteOptions};
pub use valkey::ValkeyClient;
