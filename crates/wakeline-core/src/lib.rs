pub mod config;
pub mod session_store;
pub mod status;
pub mod storage_paths;

pub const DEFAULT_BACKEND_ORIGIN: &str = "http://127.0.0.1:5000";
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";
pub const DEFAULT_PROXY_PORT: u16 = 8787;

pub use config::*;
pub use session_store::*;
pub use status::*;
pub use storage_paths::*;
