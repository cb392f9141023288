/*!
 * Device manager.
 *
 * The manager owns the enumerator and the view context, remembers which
 * devices are of interest and turns uevents into [`DeviceNotification`]s.
 *
 * Interest is memoized per identifier. A positive answer sticks until the
 * device is removed; a negative one is re-checked whenever an event for the
 * device arrives, since a later `change` (a disk getting formatted, say)
 * can make it interesting.
 */
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument};

use hotplug_core::config::{ActionConfig, Config, UdevConfig};
use hotplug_core::logging::component_span;
use hotplug_core::types::Udi;
use hotplug_core::utils::spawn_and_log;

use crate::action::{media_dir_from_config, ActionCoordinator};
use crate::cdrom::{DiscDriver, LinuxCdrom};
use crate::classify::{is_of_interest, supports, CapabilityKind};
use crate::cpuinfo::CpuInfo;
use crate::device::Device;
use crate::enumerate::DeviceEnumerator;
use crate::error::{Result, UdevError};
use crate::helper::{CommandHelper, PrivilegedHelper};
use crate::monitor::{MonitorOptions, NetlinkMonitor};
use crate::mounts::MountTable;
use crate::notification::DeviceNotification;
use crate::record::DeviceRecord;
use crate::sysfs::Sysfs;
use crate::uevent::{Action, UEvent};
use crate::views::ViewContext;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Builder for [`DeviceManager`]
///
/// Every collaborator defaults to the one described by the configuration;
/// the `with_*` methods replace them, mostly for tests and embedding.
#[derive(Debug)]
pub struct DeviceManagerBuilder {
    udev: UdevConfig,
    actions: ActionConfig,
    sysfs: Option<Sysfs>,
    mounts: Option<MountTable>,
    cpuinfo: Option<Arc<CpuInfo>>,
    helper: Option<Arc<dyn PrivilegedHelper>>,
    disc: Option<Arc<dyn DiscDriver>>,
    media_dir: Option<PathBuf>,
    channel_capacity: usize,
}

impl DeviceManagerBuilder {
    /// Start from `config`
    pub fn new(config: &Config) -> Self {
        Self {
            udev: config.udev.clone(),
            actions: config.actions.clone(),
            sysfs: None,
            mounts: None,
            cpuinfo: None,
            helper: None,
            disc: None,
            media_dir: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Read devices from `sysfs`
    pub fn with_sysfs(mut self, sysfs: Sysfs) -> Self {
        self.sysfs = Some(sysfs);
        self
    }

    /// Resolve mount points from `mounts`
    pub fn with_mounts(mut self, mounts: MountTable) -> Self {
        self.mounts = Some(mounts);
        self
    }

    /// Read CPU descriptions from `cpuinfo`
    pub fn with_cpuinfo(mut self, cpuinfo: CpuInfo) -> Self {
        self.cpuinfo = Some(Arc::new(cpuinfo));
        self
    }

    /// Mount and unmount through `helper`
    pub fn with_helper(mut self, helper: Arc<dyn PrivilegedHelper>) -> Self {
        self.helper = Some(helper);
        self
    }

    /// Query and eject optical drives through `disc`
    pub fn with_disc(mut self, disc: Arc<dyn DiscDriver>) -> Self {
        self.disc = Some(disc);
        self
    }

    /// Create mount points below `dir`
    pub fn with_media_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.media_dir = Some(dir.into());
        self
    }

    /// Buffer size of the notification channels
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Build the manager and take the initial device snapshot
    pub fn build(self) -> DeviceManager {
        let sysfs = self.sysfs.unwrap_or_else(|| Sysfs::from_config(&self.udev));
        let mounts = self
            .mounts
            .unwrap_or_else(|| MountTable::new(&self.udev.mount_table));
        let cpuinfo = self
            .cpuinfo
            .unwrap_or_else(|| Arc::new(CpuInfo::new(&self.udev.cpuinfo)));
        let helper = self
            .helper
            .unwrap_or_else(|| Arc::new(CommandHelper::from_config(&self.actions)));
        let disc = self.disc.unwrap_or_else(|| Arc::new(LinuxCdrom));
        let media_dir = self
            .media_dir
            .unwrap_or_else(|| media_dir_from_config(&self.actions));

        let (notifications, _) = broadcast::channel(self.channel_capacity);
        let (uevents, _) = broadcast::channel(self.channel_capacity);
        let actions = Arc::new(ActionCoordinator::new(
            helper,
            disc,
            notifications.clone(),
            media_dir,
        ));
        let context = Arc::new(ViewContext::new(
            self.udev.udi_prefix.clone(),
            mounts,
            cpuinfo,
            actions,
        ));

        let manager = DeviceManager {
            enumerator: DeviceEnumerator::new(sysfs, self.udev.subsystems.clone()),
            monitor_options: MonitorOptions::from_config(&self.udev),
            context,
            interest: RwLock::new(HashMap::new()),
            notifications,
            uevents,
        };
        manager.seed();
        manager
    }
}

/// Tracks the devices of interest and publishes their lifecycle
#[derive(Debug)]
pub struct DeviceManager {
    enumerator: DeviceEnumerator,
    monitor_options: MonitorOptions,
    context: Arc<ViewContext>,
    interest: RwLock<HashMap<Udi, bool>>,
    notifications: broadcast::Sender<DeviceNotification>,
    uevents: broadcast::Sender<UEvent>,
}

impl DeviceManager {
    /// Create a manager with the collaborators `config` describes
    pub fn new(config: &Config) -> Self {
        Self::builder(config).build()
    }

    /// Start building a manager from `config`
    pub fn builder(config: &Config) -> DeviceManagerBuilder {
        DeviceManagerBuilder::new(config)
    }

    /// Shared view context
    pub fn context(&self) -> &Arc<ViewContext> {
        &self.context
    }

    /// Enumerator used for snapshots
    pub fn enumerator(&self) -> &DeviceEnumerator {
        &self.enumerator
    }

    /// Identifier of the synthetic root device
    pub fn root_udi(&self) -> Udi {
        Udi::new(self.context.udi_prefix())
    }

    /// Receive device and action notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceNotification> {
        self.notifications.subscribe()
    }

    /// Receive the raw events of tracked devices
    ///
    /// Battery and adapter views are fed from here to compute their deltas.
    pub fn subscribe_uevents(&self) -> broadcast::Receiver<UEvent> {
        self.uevents.subscribe()
    }

    fn interest(&self) -> RwLockReadGuard<'_, HashMap<Udi, bool>> {
        self.interest.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn interest_mut(&self) -> RwLockWriteGuard<'_, HashMap<Udi, bool>> {
        self.interest.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of devices currently of interest
    pub fn interest_len(&self) -> usize {
        self.interest().values().filter(|v| **v).count()
    }

    /// Whether `udi` is currently of interest
    pub fn is_tracked(&self, udi: &Udi) -> bool {
        self.interest().get(udi).copied().unwrap_or(false)
    }

    /// Memoized interest check
    fn check_interest(&self, udi: &Udi, record: &DeviceRecord) -> bool {
        if self.is_tracked(udi) {
            return true;
        }
        let interesting = is_of_interest(record);
        trace!(%udi, interesting, "classified");
        self.interest_mut().insert(udi.clone(), interesting);
        interesting
    }

    fn seed(&self) {
        let records = self.enumerator.enumerate();
        let mut interest = self.interest_mut();
        for record in &records {
            interest.insert(self.context.udi(record), is_of_interest(record));
        }
        let tracked = interest.values().filter(|v| **v).count();
        info!(enumerated = records.len(), tracked, "initial device snapshot taken");
    }

    /// Records of every device of interest, read afresh from sysfs
    fn interesting_records(&self) -> Vec<DeviceRecord> {
        self.enumerator
            .enumerate()
            .into_iter()
            .filter(|record| self.check_interest(&self.context.udi(record), record))
            .collect()
    }

    /// Identifiers of every device of interest
    ///
    /// Re-enumerates sysfs. Newly seen devices are remembered but not
    /// announced; announcements come only from events.
    pub fn all_devices(&self) -> Vec<Udi> {
        self.interesting_records()
            .iter()
            .map(|record| self.context.udi(record))
            .collect()
    }

    /// Identifiers of the devices of interest matching both filters
    ///
    /// `parent` must equal the device's [`parent_udi`](Self::parent_udi)
    /// exactly; `kind` must be supported by the device.
    pub fn devices_from_query(&self, parent: Option<&Udi>, kind: Option<CapabilityKind>) -> Vec<Udi> {
        self.interesting_records()
            .iter()
            .filter(|record| kind.map_or(true, |kind| supports(record, kind)))
            .filter(|record| parent.map_or(true, |parent| self.parent_udi(record) == *parent))
            .map(|record| self.context.udi(record))
            .collect()
    }

    /// Parent identifier reported for `record`
    ///
    /// Block devices and CD-ROM drives report themselves, so consumers can
    /// reach the drive interface through the parent of a volume. Devices
    /// without a device ancestor hang off the root.
    pub fn parent_udi(&self, record: &DeviceRecord) -> Udi {
        if record.subsystem() == "block" || record.property_int("ID_CDROM") == 1 {
            return self.context.udi(record);
        }
        record
            .parent()
            .map(|parent| self.context.udi(&parent))
            .unwrap_or_else(|| self.root_udi())
    }

    /// Look up the device behind `udi`
    pub fn device(&self, udi: &Udi) -> Result<Device> {
        let prefix = self.context.udi_prefix();
        if udi.is_root(prefix) {
            return Ok(Device::root(Arc::clone(&self.context)));
        }
        let record = udi
            .syspath(prefix)
            .and_then(|syspath| self.enumerator.device_by_syspath(syspath))
            .ok_or_else(|| UdevError::DeviceNotFound(udi.to_string()))?;
        let parent = self.parent_udi(&record);
        Ok(Device::new(record, parent, Arc::clone(&self.context)))
    }

    fn publish(&self, notification: DeviceNotification) {
        debug!(?notification, "device notification");
        // Nobody listening is fine.
        let _ = self.notifications.send(notification);
    }

    /// Apply one event to the interest map and publish what it means
    ///
    /// Events of devices that are (or just stopped being) of interest are
    /// also republished on the raw event channel.
    pub fn handle_event(&self, event: &UEvent) {
        let udi = self.context.udi(&event.record);
        let relevant = match event.action {
            Action::Add => {
                let known = self.is_tracked(&udi);
                let interesting = self.check_interest(&udi, &event.record);
                if interesting && !known {
                    self.publish(DeviceNotification::DeviceAdded { udi: udi.clone() });
                }
                interesting
            }
            Action::Remove => {
                let interesting = self.check_interest(&udi, &event.record);
                self.interest_mut().remove(&udi);
                if interesting {
                    self.publish(DeviceNotification::DeviceRemoved { udi: udi.clone() });
                }
                interesting
            }
            Action::Change => {
                let interesting = self.check_interest(&udi, &event.record);
                if interesting && event.record.subsystem() == "block" {
                    let usage = event.record.property("ID_FS_USAGE");
                    self.publish(DeviceNotification::ContentChanged {
                        udi: udi.clone(),
                        has_filesystem: usage == "filesystem" || usage == "crypto",
                    });
                }
                interesting
            }
            Action::Online | Action::Offline | Action::Bind | Action::Unbind => {
                trace!(%udi, action = %event.action, "no transition for action");
                self.is_tracked(&udi)
            }
        };

        if relevant {
            let _ = self.uevents.send(event.clone());
        }
    }

    /// Open the kernel event socket
    ///
    /// Failure is not fatal: the manager keeps answering queries from
    /// enumeration, it just never hears about changes.
    pub fn open_monitor(&self) -> Option<NetlinkMonitor> {
        match NetlinkMonitor::start(self.enumerator.sysfs().clone(), self.monitor_options.clone()) {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                warn!(error = %e, "device monitoring unavailable, continuing with enumeration only");
                None
            }
        }
    }

    /// Handle events from `monitor` one at a time until receiving fails
    pub async fn run(&self, mut monitor: NetlinkMonitor) -> Result<()> {
        self.event_loop(&mut monitor)
            .instrument(component_span("device-manager", None))
            .await
    }

    async fn event_loop(&self, monitor: &mut NetlinkMonitor) -> Result<()> {
        info!("watching for device events");
        loop {
            let event = monitor.next_event().await?;
            self.handle_event(&event);
        }
    }

    /// Open the monitor and run the manager on a background task
    ///
    /// Returns `None` when the monitor could not be opened.
    pub fn spawn(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let monitor = self.open_monitor()?;
        let manager = Arc::clone(self);
        Some(spawn_and_log("device-manager", async move {
            manager.run(monitor).await
        }))
    }
}
