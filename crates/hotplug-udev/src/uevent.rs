/*!
 * Device events and their netlink encoding.
 *
 * Two message formats arrive on a `NETLINK_KOBJECT_UEVENT` socket:
 *
 * - kernel messages, `action@devpath\0KEY=VALUE\0...`, on multicast group 1;
 * - udevd messages on group 2, framed by a `libudev` header that gives the
 *   offset and length of the `KEY=VALUE\0...` block.
 *
 * [`decode_message`] turns either one into a property map; the monitor then
 * builds a [`UEvent`] with a fresh [`DeviceRecord`] from it.
 */
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use hotplug_core::types::{PropertyMap, Udi};

use crate::record::DeviceRecord;

/// Prefix of udevd monitor messages
pub const LIBUDEV_PREFIX: &[u8; 8] = b"libudev\0";

/// Magic number following the prefix, big endian
pub const LIBUDEV_MAGIC: u32 = 0xfeed_cafe;

/// Size of the fixed part of the libudev header read here
const LIBUDEV_HEADER_LEN: usize = 24;

/// Action tag of a device event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Device appeared
    Add,
    /// Device disappeared
    Remove,
    /// Device properties changed
    Change,
    /// Device went online (CPU hotplug)
    Online,
    /// Device went offline (CPU hotplug)
    Offline,
    /// Driver bound
    Bind,
    /// Driver unbound
    Unbind,
}

impl Action {
    /// Lowercase wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Change => "change",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Bind => "bind",
            Self::Unbind => "unbind",
        }
    }

    /// Driver binding events carry no device state and are dropped quietly
    pub fn is_ignored(self) -> bool {
        matches!(self, Self::Bind | Self::Unbind)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action tag not understood by this crate, e.g. "move"
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown uevent action: {0:?}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            "change" => Ok(Self::Change),
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "bind" => Ok(Self::Bind),
            "unbind" => Ok(Self::Unbind),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Malformed netlink message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Nothing was received
    #[error("empty message")]
    Empty,
    /// A libudev header with the wrong magic number
    #[error("bad libudev magic {0:#010x}")]
    BadMagic(u32),
    /// Header or property block runs past the end of the message
    #[error("message truncated: need {needed} bytes, have {len}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes received
        len: usize,
    },
    /// Kernel message without `action@devpath` header
    #[error("missing action@devpath header")]
    MissingHeader,
    /// No `ACTION` property
    #[error("message has no ACTION")]
    MissingAction,
    /// No `DEVPATH` property
    #[error("message has no DEVPATH")]
    MissingDevpath,
}

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    /// The kernel, before udev rules ran
    Kernel,
    /// udevd, after rule processing
    Udev,
}

/// A decoded message: its producer and property map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Producer
    pub source: MessageSource,
    /// All `KEY=VALUE` pairs, including `ACTION` and `DEVPATH`
    pub properties: PropertyMap,
}

impl RawMessage {
    /// The `ACTION` property
    pub fn action(&self) -> &str {
        self.properties.get("ACTION").map(String::as_str).unwrap_or_default()
    }

    /// The `SUBSYSTEM` property
    pub fn subsystem(&self) -> &str {
        self.properties.get("SUBSYSTEM").map(String::as_str).unwrap_or_default()
    }

    /// The `SEQNUM` property
    pub fn seqnum(&self) -> Option<u64> {
        self.properties.get("SEQNUM")?.parse().ok()
    }
}

fn read_u32(buf: &[u8], at: usize, convert: fn([u8; 4]) -> u32) -> Result<u32, DecodeError> {
    buf.get(at..at + 4)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(convert)
        .ok_or(DecodeError::Truncated {
            needed: at + 4,
            len: buf.len(),
        })
}

fn parse_properties(block: &[u8], properties: &mut PropertyMap) {
    for field in block.split(|b| *b == 0) {
        let field = String::from_utf8_lossy(field);
        if let Some((key, value)) = field.split_once('=') {
            if !key.is_empty() {
                properties.insert(key.to_string(), value.to_string());
            }
        }
    }
}

/// Decode one datagram received on a uevent netlink socket
pub fn decode_message(buf: &[u8]) -> Result<RawMessage, DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut properties = PropertyMap::new();
    let source = if buf.starts_with(LIBUDEV_PREFIX) {
        let magic = read_u32(buf, 8, u32::from_be_bytes)?;
        if magic != LIBUDEV_MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        if buf.len() < LIBUDEV_HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: LIBUDEV_HEADER_LEN,
                len: buf.len(),
            });
        }
        let offset = read_u32(buf, 16, u32::from_ne_bytes)? as usize;
        let length = read_u32(buf, 20, u32::from_ne_bytes)? as usize;
        let end = offset.saturating_add(length);
        let block = buf.get(offset..end).ok_or(DecodeError::Truncated {
            needed: end,
            len: buf.len(),
        })?;
        parse_properties(block, &mut properties);
        MessageSource::Udev
    } else {
        let header_end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        let header = String::from_utf8_lossy(&buf[..header_end]);
        let (action, devpath) = header.split_once('@').ok_or(DecodeError::MissingHeader)?;
        properties.insert("ACTION".to_string(), action.to_string());
        properties.insert("DEVPATH".to_string(), devpath.to_string());
        if header_end < buf.len() {
            parse_properties(&buf[header_end + 1..], &mut properties);
        }
        MessageSource::Kernel
    };

    if properties.get("ACTION").map_or(true, String::is_empty) {
        return Err(DecodeError::MissingAction);
    }
    if properties.get("DEVPATH").map_or(true, String::is_empty) {
        return Err(DecodeError::MissingDevpath);
    }
    Ok(RawMessage { source, properties })
}

/// Encode properties as a udevd monitor message
///
/// The inverse of [`decode_message`] for [`MessageSource::Udev`]; used to
/// feed synthetic events through the same decoding path.
pub fn encode_udev_message(properties: &PropertyMap) -> Vec<u8> {
    let mut block = Vec::new();
    for (key, value) in properties {
        block.extend_from_slice(key.as_bytes());
        block.push(b'=');
        block.extend_from_slice(value.as_bytes());
        block.push(0);
    }

    let header_size = 40u32;
    let mut buf = Vec::with_capacity(header_size as usize + block.len());
    buf.extend_from_slice(LIBUDEV_PREFIX);
    buf.extend_from_slice(&LIBUDEV_MAGIC.to_be_bytes());
    buf.extend_from_slice(&header_size.to_ne_bytes());
    buf.extend_from_slice(&header_size.to_ne_bytes());
    buf.extend_from_slice(&(block.len() as u32).to_ne_bytes());
    // Subsystem and devtype hashes, tag bloom filter.
    buf.resize(header_size as usize, 0);
    buf.extend_from_slice(&block);
    buf
}

/// One device event
#[derive(Debug, Clone)]
pub struct UEvent {
    /// What happened
    pub action: Action,
    /// New snapshot of the device
    pub record: DeviceRecord,
    /// Kernel sequence number, when present
    pub seqnum: Option<u64>,
    /// When the event was received
    pub received_at: DateTime<Utc>,
}

impl UEvent {
    /// Create an event received now
    pub fn new(action: Action, record: DeviceRecord) -> Self {
        let seqnum = record.property("SEQNUM").parse().ok();
        Self {
            action,
            record,
            seqnum,
            received_at: Utc::now(),
        }
    }

    /// Identifier of the device under `prefix`
    pub fn udi(&self, prefix: &str) -> Udi {
        self.record.udi(prefix)
    }
}
