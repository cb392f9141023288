/*!
 * Core data types for hotplug.
 *
 * Device identifiers and the property bag shared by the device layer.
 */
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name/value properties of a device, as exported by the kernel and udev
pub type PropertyMap = BTreeMap<String, String>;

/// Externally visible device identifier (`<prefix><sysfs path>`)
///
/// Identifiers are opaque handles: they are only ever compared for
/// equality, never parsed by consumers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Udi(String);

impl Udi {
    /// Create an identifier from a raw string
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    /// Build the identifier of the device living at `syspath`
    pub fn from_syspath(prefix: &str, syspath: &str) -> Self {
        Self(format!("{}{}", prefix, syspath))
    }

    /// Get the string representation of the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the sysfs path part, if this identifier uses `prefix`
    ///
    /// The bare prefix (the root device) has no sysfs path.
    pub fn syspath(&self, prefix: &str) -> Option<&str> {
        self.0
            .strip_prefix(prefix)
            .filter(|rest| rest.starts_with('/'))
    }

    /// Whether this is the synthetic root identifier for `prefix`
    pub fn is_root(&self, prefix: &str) -> bool {
        self.0 == prefix
    }
}

impl fmt::Display for Udi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Udi {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Udi {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Udi {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
