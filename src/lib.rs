pub mod app;

pub use app::adb::collaborators::{
    BatteryFetcher, ChangeBroadcaster, DisconnectionTracker, PropertyFetcher, ShellRequest,
    ShellService, ShellTimeouts, SplitInstaller, SyncConnector, SyncProgress, SyncSession,
    Transport,
};
pub use app::adb::pending::{Completer, Pending};
pub use app::adb::receiver::{CollectingReceiver, LineReceiver, NullReceiver, OutputReceiver};
pub use app::config::{load_config, SessionConfig};
pub use app::device::{Client, ClientEvent, ClientListener, Collaborators, DeviceSession};
pub use app::error::{DeviceError, ErrorKind};
pub use app::logging::init_logging;
pub use app::models::{
    AndroidVersion, ChangeMask, DeviceState, Feature, HardwareFeature, InstallErrorCode,
    InstallMetrics,
};
