/*!
 * Netlink uevent monitor.
 *
 * [`NetlinkMonitor`] owns a non-blocking `NETLINK_KOBJECT_UEVENT` socket
 * registered with the tokio reactor. Each readable datagram is decoded,
 * filtered by subsystem and turned into one [`UEvent`] holding a freshly
 * built [`DeviceRecord`](crate::record::DeviceRecord).
 *
 * Delivery is best effort: when the consumer falls behind, the kernel drops
 * datagrams (`ENOBUFS`), which is logged and skipped.
 */
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use futures::stream::{self, Stream};
use nix::errno::Errno;
use nix::sys::socket::{
    bind, recvfrom, setsockopt, socket, sockopt, AddressFamily, NetlinkAddr, SockFlag, SockProtocol, SockType,
};
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace, warn};

use hotplug_core::config::{NetlinkGroup, UdevConfig};

use crate::error::{MonitorInitError, UdevError};
use crate::sysfs::Sysfs;
use crate::uevent::{decode_message, Action, MessageSource, RawMessage, UEvent};

/// Largest datagram read in one go
const MESSAGE_BUFFER_SIZE: usize = 16 * 1024;

/// What the monitor listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Subsystems to deliver; empty means all
    pub subsystems: Vec<String>,
    /// Multicast group
    pub group: NetlinkGroup,
    /// Requested socket receive buffer in bytes; 0 keeps the default
    pub receive_buffer_size: usize,
}

impl MonitorOptions {
    /// Options from the `[udev]` configuration section
    pub fn from_config(config: &UdevConfig) -> Self {
        Self {
            subsystems: config.subsystems.clone(),
            group: config.monitor_group,
            receive_buffer_size: config.receive_buffer_size,
        }
    }

    fn accepts(&self, subsystem: &str) -> bool {
        self.subsystems.is_empty() || self.subsystems.iter().any(|s| s == subsystem)
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from_config(&UdevConfig::default())
    }
}

/// Live source of device events
#[derive(Debug)]
pub struct NetlinkMonitor {
    socket: AsyncFd<OwnedFd>,
    sysfs: Sysfs,
    options: MonitorOptions,
    buf: Vec<u8>,
}

fn open_socket(options: &MonitorOptions) -> io::Result<OwnedFd> {
    let fd = socket(
        AddressFamily::Netlink,
        SockType::Raw,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        SockProtocol::NetlinkKObjectUEvent,
    )?;
    bind(fd.as_raw_fd(), &NetlinkAddr::new(0, options.group.mask()))?;

    if options.receive_buffer_size > 0 {
        let size = options.receive_buffer_size;
        // SO_RCVBUFFORCE needs CAP_NET_ADMIN; fall back to the capped variant.
        if setsockopt(&fd, sockopt::RcvBufForce, &size).is_err() {
            if let Err(e) = setsockopt(&fd, sockopt::RcvBuf, &size) {
                warn!(error = %e, size, "cannot set uevent receive buffer size");
            }
        }
    }
    Ok(fd)
}

/// Read one datagram, returning its length and the sender's port id
fn recv_from(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<(usize, u32)> {
    let (len, sender) = recvfrom::<NetlinkAddr>(fd.as_raw_fd(), buf)?;
    Ok((len, sender.map_or(0, |addr| addr.pid())))
}

/// Turn a decoded message into an event, or `None` if it is filtered out
pub(crate) fn event_from_message(sysfs: &Sysfs, options: &MonitorOptions, message: RawMessage) -> Option<UEvent> {
    let action = match message.action().parse::<Action>() {
        Ok(action) if action.is_ignored() => {
            trace!(%action, "ignoring driver binding event");
            return None;
        }
        Ok(action) => action,
        Err(e) => {
            warn!(error = %e, devpath = message.properties.get("DEVPATH").map(String::as_str), "discarding uevent");
            return None;
        }
    };
    if !options.accepts(message.subsystem()) {
        trace!(subsystem = message.subsystem(), "subsystem filtered out");
        return None;
    }
    // Kernel messages did not pass udevd, so take what it stored earlier.
    let merge_db = message.source == MessageSource::Kernel;
    let record = sysfs.device_from_uevent(message.properties, merge_db)?;
    Some(UEvent::new(action, record))
}

impl NetlinkMonitor {
    /// Open the socket and join the configured multicast group
    ///
    /// Fails when the socket cannot be created or bound, typically for lack
    /// of privilege inside a sandbox.
    pub fn start(sysfs: Sysfs, options: MonitorOptions) -> Result<Self, MonitorInitError> {
        let fd = open_socket(&options)?;
        let socket = AsyncFd::new(fd)?;
        debug!(group = ?options.group, subsystems = ?options.subsystems, "uevent monitor started");
        Ok(Self {
            socket,
            sysfs,
            options,
            buf: vec![0; MESSAGE_BUFFER_SIZE],
        })
    }

    /// Options the monitor was started with
    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    /// Wait for the next event that passes the filters
    pub async fn next_event(&mut self) -> Result<UEvent, UdevError> {
        loop {
            let mut guard = self.socket.readable().await.map_err(UdevError::Receive)?;
            let received = match guard.try_io(|fd| recv_from(fd.get_ref(), &mut self.buf)) {
                Ok(result) => result,
                Err(_would_block) => continue,
            };
            let (len, sender) = match received {
                Ok(received) => received,
                Err(e) if e.raw_os_error() == Some(Errno::ENOBUFS as i32) => {
                    warn!("uevent socket overflowed, events were lost");
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(UdevError::Receive(e)),
            };

            // Only the kernel may send on the kernel group.
            if self.options.group == NetlinkGroup::Kernel && sender != 0 {
                debug!(sender, "dropping uevent from userspace sender");
                continue;
            }

            let message = match decode_message(&self.buf[..len]) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, len, "undecodable uevent");
                    continue;
                }
            };
            if let Some(event) = event_from_message(&self.sysfs, &self.options, message) {
                trace!(action = %event.action, syspath = event.record.syspath(), "uevent");
                return Ok(event);
            }
        }
    }

    /// Endless stream of events
    pub fn into_stream(self) -> impl Stream<Item = Result<UEvent, UdevError>> {
        stream::unfold(self, |mut monitor| async move {
            let item = monitor.next_event().await;
            Some((item, monitor))
        })
    }
}
