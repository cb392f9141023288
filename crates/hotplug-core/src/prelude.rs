/*!
 * Commonly used hotplug core items.
 */

pub use crate::config::{ActionConfig, Config, ConfigBuilder, LoggingConfig, NetlinkGroup, SharedConfig, UdevConfig};
pub use crate::error::{Error, Result};
pub use crate::types::{PropertyMap, Udi};
pub use crate::utils::{spawn_and_log, with_timeout};

pub use tracing::{debug, error, info, trace, warn};

pub use crate::init;
