pub mod credential;
pub mod health;
pub mod operation;

pub use credential::*;
pub use health::*;
pub use operation::*;
