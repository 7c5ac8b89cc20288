pub mod config;
pub mod error;
pub mod log;
pub mod result;
pub mod server;
pub mod utils;

pub use config::Config;
pub use error::Error;
pub use result::{ErrLog, Result};
pub use server::Server;
