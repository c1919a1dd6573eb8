pub mod config;
pub mod error;
pub mod result;
pub mod template;

pub use config::Config;
pub use error::*;
pub use result::*;
pub use template::*;
