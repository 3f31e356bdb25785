pub mod data;
pub mod defaults;
pub mod io;
pub mod printing;

pub use data::{Config, Settings};
pub use io::{resolve_data_dir, ConfigError};
