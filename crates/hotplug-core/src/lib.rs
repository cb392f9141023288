/*!
 * hotplug core
 *
 * Configuration, logging, error handling and the shared identifier types
 * used by the hotplug device layer and its front ends.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use serde;
    pub use tokio;
    pub use tracing;
}

/// hotplug core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization with the default logging setup
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("hotplug core {} initialized", VERSION);
    Ok(())
}
