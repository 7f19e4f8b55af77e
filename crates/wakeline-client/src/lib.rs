pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod transport;
pub mod variants;
pub mod wake;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::*;
pub use error::*;
pub use monitor::*;
pub use transport::*;
pub use variants::*;
pub use wake::*;
