pub mod client;
pub mod store;

pub use client::{create_client, library_name};
pub use store::RedisStore;
