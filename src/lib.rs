pub mod cache;
pub mod config;
pub mod exception;
pub mod filter;
pub mod gateway;
pub mod generator;
pub mod key;
pub mod param;
pub mod path;
pub mod request;
pub mod response;
pub mod server;
pub mod util;

pub use cache::{ArtifactStore, CacheEntry, DiskStore, MemoryStore};
pub use config::Config;
pub use exception::Exception;
pub use gateway::{Gateway, Outcome, Source};
pub use generator::{Generate, Generation, OpenRouterClient};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::Response;
pub use server::ServerState;
pub use util::HtmlBuilder;
