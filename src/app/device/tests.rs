use super::*;

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::app::adb::collaborators::{
    ShellRequest, ShellService, ShellTimeouts, SyncProgress, SyncSession,
};
use crate::app::adb::pending::{Completer, Pending};
use crate::app::adb::receiver::{CollectingReceiver, NullReceiver, OutputReceiver};
use crate::app::error::ErrorKind;
use crate::app::models::{AndroidVersion, ChangeMask, Feature, HardwareFeature};

type Log = Arc<Mutex<Vec<String>>>;

fn push_log(log: &Log, entry: String) {
    log.lock().expect("log").push(entry);
}

#[derive(Debug, Clone)]
struct Call {
    service: ShellService,
    command: String,
    timeouts: ShellTimeouts,
    input: Option<Vec<u8>>,
}

#[derive(Default)]
struct FakeTransport {
    scripts: Mutex<Vec<(String, VecDeque<Result<String, DeviceError>>)>>,
    calls: Mutex<Vec<Call>>,
    device_features: Mutex<Option<Result<String, DeviceError>>>,
    host_features: Mutex<Option<Result<String, DeviceError>>>,
    feature_queries: AtomicUsize,
}

impl FakeTransport {
    /// Queued responses for commands starting with `prefix`; the last one repeats.
    fn script(&self, prefix: &str, responses: Vec<Result<String, DeviceError>>) {
        self.scripts
            .lock()
            .expect("scripts")
            .push((prefix.to_string(), responses.into()));
    }

    fn set_features(&self, device: Result<&str, DeviceError>, host: Result<&str, DeviceError>) {
        *self.device_features.lock().expect("features") = Some(device.map(str::to_string));
        *self.host_features.lock().expect("features") = Some(host.map(str::to_string));
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls").clone()
    }

    fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.command).collect()
    }

    fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    fn next_response(&self, command: &str) -> Result<String, DeviceError> {
        let mut scripts = self.scripts.lock().expect("scripts");
        let Some((_, queue)) = scripts
            .iter_mut()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        else {
            return Ok(String::new());
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_else(|| Ok(String::new()))
        } else {
            queue.front().cloned().unwrap_or_else(|| Ok(String::new()))
        }
    }
}

impl Transport for FakeTransport {
    fn execute(
        &self,
        _serial: &str,
        request: ShellRequest<'_>,
        receiver: &mut dyn OutputReceiver,
    ) -> Result<(), DeviceError> {
        let input = request.input.map(|reader| {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer).expect("read input");
            buffer
        });
        self.calls.lock().expect("calls").push(Call {
            service: request.service,
            command: request.command.clone(),
            timeouts: request.timeouts,
            input,
        });
        let output = self.next_response(&request.command)?;
        receiver.add_output(output.as_bytes());
        receiver.flush();
        Ok(())
    }

    fn device_features(&self, _serial: &str) -> Result<String, DeviceError> {
        self.feature_queries.fetch_add(1, Ordering::SeqCst);
        self.device_features
            .lock()
            .expect("features")
            .clone()
            .unwrap_or_else(|| Ok(String::new()))
    }

    fn host_features(&self) -> Result<String, DeviceError> {
        self.host_features
            .lock()
            .expect("features")
            .clone()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

#[derive(Default)]
struct FakeProperties {
    values: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    parked: Mutex<Vec<Completer<Option<String>>>>,
    requests: Mutex<HashMap<String, usize>>,
    cached: AtomicBool,
}

impl FakeProperties {
    fn set(&self, name: &str, value: &str) {
        self.values
            .lock()
            .expect("values")
            .insert(name.to_string(), value.to_string());
    }

    fn fail(&self, name: &str, failing: bool) {
        let mut set = self.failing.lock().expect("failing");
        if failing {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    fn requests(&self, name: &str) -> usize {
        self.requests
            .lock()
            .expect("requests")
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl PropertyFetcher for FakeProperties {
    fn property(&self, name: &str) -> Pending<Option<String>> {
        *self
            .requests
            .lock()
            .expect("requests")
            .entry(name.to_string())
            .or_default() += 1;
        if self.failing.lock().expect("failing").contains(name) {
            return Pending::failed(DeviceError::timeout("getprop timed out"));
        }
        if self.stalled.lock().expect("stalled").contains(name) {
            let (completer, pending) = Pending::channel();
            self.parked.lock().expect("parked").push(completer);
            return pending;
        }
        Pending::ready(self.values.lock().expect("values").get(name).cloned())
    }

    fn has_cached_properties(&self) -> bool {
        self.cached.load(Ordering::SeqCst)
    }

    fn cached_property(&self, name: &str) -> Option<String> {
        if !self.has_cached_properties() {
            return None;
        }
        self.values.lock().expect("values").get(name).cloned()
    }

    fn cached_properties(&self) -> HashMap<String, String> {
        self.values.lock().expect("values").clone()
    }
}

#[derive(Default)]
struct FakeBattery {
    level: Mutex<Option<Result<Option<u8>, DeviceError>>>,
}

impl BatteryFetcher for FakeBattery {
    fn battery(&self, _freshness: Duration) -> Pending<Option<u8>> {
        match self.level.lock().expect("level").clone() {
            Some(Ok(level)) => Pending::ready(level),
            Some(Err(err)) => Pending::failed(err),
            None => Pending::ready(None),
        }
    }
}

struct RecordingBroadcaster {
    log: Log,
}

impl ChangeBroadcaster for RecordingBroadcaster {
    fn notify_device_changed(&self, session: &DeviceSession, mask: ChangeMask) {
        push_log(&self.log, format!("device:{}:{}", session.serial(), mask.bits()));
    }

    fn notify_client_changed(&self, client: &Client, mask: ChangeMask) {
        push_log(&self.log, format!("client:{}:{}", client.pid(), mask.bits()));
    }
}

struct RecordingTracker {
    log: Log,
}

impl DisconnectionTracker for RecordingTracker {
    fn on_client_disconnected(&self, client: &Client) {
        push_log(&self.log, format!("tracker:{}", client.pid()));
    }
}

struct FakeSync {
    log: Log,
    available: AtomicBool,
    fail_transfers: AtomicBool,
}

struct FakeSyncSession {
    log: Log,
    fail: bool,
}

impl SyncConnector for FakeSync {
    fn open(&self, _serial: &str) -> Result<Option<Box<dyn SyncSession>>, DeviceError> {
        if !self.available.load(Ordering::SeqCst) {
            return Ok(None);
        }
        push_log(&self.log, "open".to_string());
        Ok(Some(Box::new(FakeSyncSession {
            log: Arc::clone(&self.log),
            fail: self.fail_transfers.load(Ordering::SeqCst),
        })))
    }
}

impl SyncSession for FakeSyncSession {
    fn push(
        &mut self,
        local: &Path,
        remote: &str,
        _progress: &mut dyn SyncProgress,
    ) -> Result<(), DeviceError> {
        push_log(&self.log, format!("push:{}->{remote}", local.display()));
        if self.fail {
            return Err(DeviceError::sync("remote write failed"));
        }
        Ok(())
    }

    fn pull(
        &mut self,
        remote: &str,
        local: &Path,
        _progress: &mut dyn SyncProgress,
    ) -> Result<(), DeviceError> {
        push_log(&self.log, format!("pull:{remote}->{}", local.display()));
        if self.fail {
            return Err(DeviceError::sync("remote read failed"));
        }
        Ok(())
    }

    fn close(&mut self) {
        push_log(&self.log, "close".to_string());
    }
}

#[derive(Default)]
struct FakeSplitInstaller {
    failure: Mutex<Option<DeviceError>>,
    artifacts: Mutex<Vec<String>>,
}

impl FakeSplitInstaller {
    fn outcome(&self) -> Result<InstallMetrics, DeviceError> {
        if let Some(err) = self.failure.lock().expect("failure").clone() {
            return Err(err);
        }
        let start = Instant::now();
        Ok(InstallMetrics::new(start, start, Instant::now()))
    }
}

impl SplitInstaller for FakeSplitInstaller {
    fn install(
        &self,
        _session: &DeviceSession,
        artifacts: &[PathBuf],
        _reinstall: bool,
        _options: &[String],
        _timeout: Duration,
    ) -> Result<InstallMetrics, DeviceError> {
        self.artifacts
            .lock()
            .expect("artifacts")
            .extend(artifacts.iter().map(|path| path.display().to_string()));
        self.outcome()
    }

    fn install_remote(
        &self,
        _session: &DeviceSession,
        remote_artifacts: &[String],
        _reinstall: bool,
        _options: &[String],
        _timeout: Duration,
    ) -> Result<InstallMetrics, DeviceError> {
        self.artifacts
            .lock()
            .expect("artifacts")
            .extend(remote_artifacts.iter().cloned());
        self.outcome()
    }
}

struct Harness {
    transport: Arc<FakeTransport>,
    properties: Arc<FakeProperties>,
    battery: Arc<FakeBattery>,
    sync: Arc<FakeSync>,
    split: Arc<FakeSplitInstaller>,
    events: Log,
    sync_log: Log,
    session: Arc<DeviceSession>,
}

fn fast_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.timeouts.property_wait_ms = 20;
    config.timeouts.initial_property_wait_ms = 50;
    config.timeouts.battery_wait_ms = 50;
    config
}

fn harness(serial: &str, state: DeviceState) -> Harness {
    let transport = Arc::new(FakeTransport::default());
    let properties = Arc::new(FakeProperties::default());
    let battery = Arc::new(FakeBattery::default());
    let events: Log = Arc::default();
    let sync_log: Log = Arc::default();
    let sync = Arc::new(FakeSync {
        log: Arc::clone(&sync_log),
        available: AtomicBool::new(true),
        fail_transfers: AtomicBool::new(false),
    });
    let split = Arc::new(FakeSplitInstaller::default());
    let collaborators = Collaborators {
        transport: transport.clone(),
        sync: sync.clone(),
        properties: properties.clone(),
        battery: battery.clone(),
        broadcaster: Arc::new(RecordingBroadcaster {
            log: Arc::clone(&events),
        }),
        disconnections: Arc::new(RecordingTracker {
            log: Arc::clone(&events),
        }),
        split_installer: split.clone(),
    };
    let session = DeviceSession::new(serial, state, collaborators, fast_config());
    Harness {
        transport,
        properties,
        battery,
        sync,
        split,
        events,
        sync_log,
        session,
    }
}

fn online(serial: &str) -> Harness {
    harness(serial, DeviceState::Online)
}

fn local_apk(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"PK\x03\x04").expect("write apk");
    path
}

// ---- identity and state ----

#[test]
fn emulator_identity_comes_from_serial() {
    let h = online("emulator-5554");
    assert!(h.session.is_emulator());
    assert_eq!(h.session.emulator_console_port(), Some(5554));

    let h = online("R5CT1234ABC");
    assert!(!h.session.is_emulator());
    assert_eq!(h.session.emulator_console_port(), None);
}

#[test]
fn avd_name_is_rejected_on_physical_devices() {
    let h = online("R5CT1234ABC");
    let err = h
        .session
        .set_avd_name(Some("Pixel_7_API_34".to_string()))
        .expect_err("physical device");
    assert_eq!(err.kind, ErrorKind::CommandRejected);
    assert_eq!(h.session.avd_name(), None);

    let h = online("emulator-5554");
    h.session
        .set_avd_name(Some("Pixel_7_API_34".to_string()))
        .expect("emulator");
    assert_eq!(h.session.display_name(), "Pixel_7_API_34 [emulator-5554]");
}

#[test]
fn state_predicates_follow_setter() {
    let h = harness("R5CT1234ABC", DeviceState::Offline);
    assert!(h.session.is_offline());
    h.session.set_state(DeviceState::Bootloader);
    assert!(h.session.is_bootloader());
    h.session.set_state(DeviceState::Online);
    assert!(h.session.is_online());
    assert_eq!(h.session.state(), DeviceState::Online);
}

#[test]
fn display_name_is_fixed_once_computed_online() {
    let h = harness("R5CT1234ABC", DeviceState::Offline);
    h.properties.set(PROP_DEVICE_MANUFACTURER, "Google");
    h.properties.set(PROP_DEVICE_MODEL, "Pixel 7");
    assert_eq!(h.session.display_name(), "google-pixel_7-R5CT1234ABC");

    h.properties.set(PROP_DEVICE_MODEL, "Pixel 8");
    assert_eq!(h.session.display_name(), "google-pixel_8-R5CT1234ABC");

    h.session.set_state(DeviceState::Online);
    assert_eq!(h.session.display_name(), "google-pixel_8-R5CT1234ABC");

    h.properties.set(PROP_DEVICE_MODEL, "Pixel 9");
    h.session.set_state(DeviceState::Offline);
    assert_eq!(h.session.display_name(), "google-pixel_8-R5CT1234ABC");
}

#[test]
fn display_name_skips_missing_parts() {
    let h = online("R5CT1234ABC");
    h.properties.set(PROP_DEVICE_MODEL, "SM-G991B");
    assert_eq!(h.session.display_name(), "sm_g991b-R5CT1234ABC");
}

// ---- properties ----

#[test]
fn stalled_property_degrades_to_absent() {
    let h = online("R5CT1234ABC");
    h.properties
        .stalled
        .lock()
        .expect("stalled")
        .insert("ro.product.model".to_string());
    let started = Instant::now();
    assert_eq!(h.session.property("ro.product.model"), None);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn property_failures_are_absent_not_errors() {
    let h = online("R5CT1234ABC");
    h.properties.set("persist.sys.language", "en");
    h.properties.fail("persist.sys.language", true);
    assert_eq!(h.session.property("persist.sys.language"), None);
    assert_eq!(h.session.property_sync("persist.sys.language"), None);
    assert_eq!(h.session.language(), None);

    h.properties.fail("persist.sys.language", false);
    assert_eq!(h.session.language().as_deref(), Some("en"));
}

#[test]
fn cache_or_sync_prefers_the_fetcher_cache() {
    let h = online("R5CT1234ABC");
    h.properties.set("persist.sys.country", "US");
    h.properties.cached.store(true, Ordering::SeqCst);
    assert_eq!(
        h.session.property_cache_or_sync("persist.sys.country").as_deref(),
        Some("US")
    );
    assert_eq!(h.properties.requests("persist.sys.country"), 0);
    assert!(h.session.are_properties_set());
    assert_eq!(h.session.property_count(), 1);
}

#[test]
fn system_property_hands_back_the_raw_handle() {
    let h = online("R5CT1234ABC");
    h.properties.set("ro.build.version.sdk", "34");
    let pending = h.session.system_property("ro.build.version.sdk");
    assert_eq!(pending.wait().expect("value").as_deref(), Some("34"));
}

#[test]
fn raw_property_handle_accepts_any_wait_policy() {
    let h = online("R5CT1234ABC");
    h.properties.set("ro.product.model", "Pixel 7");
    let value = h
        .session
        .system_property("ro.product.model")
        .wait_timeout(Duration::MAX)
        .expect("value");
    assert_eq!(value.as_deref(), Some("Pixel 7"));
}

#[test]
fn density_falls_back_to_emulator_property_then_unknown() {
    let h = online("emulator-5554");
    assert_eq!(h.session.density(), DENSITY_UNKNOWN);
    h.properties.set("qemu.sf.lcd_density", "420");
    assert_eq!(h.session.density(), 420);
    h.properties.set("ro.sf.lcd_density", "not-a-number");
    assert_eq!(h.session.density(), DENSITY_UNKNOWN);
    h.properties.set("ro.sf.lcd_density", "560");
    assert_eq!(h.session.density(), 560);
}

#[test]
fn abis_prefer_the_list_property() {
    let h = online("R5CT1234ABC");
    h.properties.set("ro.product.cpu.abi", "armeabi-v7a");
    h.properties.set("ro.product.cpu.abi2", "armeabi");
    assert_eq!(h.session.abis(), vec!["armeabi-v7a", "armeabi"]);

    h.properties
        .set("ro.product.cpu.abilist", "arm64-v8a,armeabi-v7a,armeabi");
    assert_eq!(h.session.abis(), vec!["arm64-v8a", "armeabi-v7a", "armeabi"]);
}

#[test]
fn battery_level_is_absent_on_failure() {
    let h = online("R5CT1234ABC");
    *h.battery.level.lock().expect("level") = Some(Ok(Some(76)));
    assert_eq!(h.session.battery_level(), Some(76));
    *h.battery.level.lock().expect("level") = Some(Err(DeviceError::rejected("device offline")));
    assert_eq!(h.session.battery_level(), None);
}

// ---- capability cache ----

#[test]
fn version_failure_is_retried_and_success_is_memoized() {
    let h = online("R5CT1234ABC");
    h.properties.fail(PROP_BUILD_API_LEVEL, true);
    assert_eq!(h.session.version(), AndroidVersion::DEFAULT);
    assert_eq!(h.session.version(), AndroidVersion::DEFAULT);
    assert_eq!(h.properties.requests(PROP_BUILD_API_LEVEL), 2);

    h.properties.fail(PROP_BUILD_API_LEVEL, false);
    h.properties.set(PROP_BUILD_API_LEVEL, "34");
    h.properties.set(PROP_BUILD_CODENAME, "REL");
    let version = h.session.version();
    assert_eq!(version.api_level, 34);
    assert!(!version.is_preview());
    assert_eq!(h.properties.requests(PROP_BUILD_API_LEVEL), 3);

    h.properties.set(PROP_BUILD_API_LEVEL, "35");
    assert_eq!(h.session.version().api_level, 34);
    assert_eq!(h.properties.requests(PROP_BUILD_API_LEVEL), 3);
}

#[test]
fn preview_build_at_max_api_level_keeps_feature_checks_total() {
    let h = online("R5CT1234ABC");
    h.properties.set(PROP_BUILD_API_LEVEL, "4294967295");
    h.properties.set(PROP_BUILD_CODENAME, "Baklava");
    assert!(h.session.supports_feature(Feature::Procstats));
    assert_eq!(h.session.version().feature_level(), u32::MAX);
}

#[test]
fn unparsable_api_level_is_not_cached() {
    let h = online("R5CT1234ABC");
    h.properties.set(PROP_BUILD_API_LEVEL, "UpsideDownCake");
    assert_eq!(h.session.version(), AndroidVersion::DEFAULT);
    h.properties.set(PROP_BUILD_API_LEVEL, "33");
    assert_eq!(h.session.version().api_level, 33);
}

#[test]
fn feature_intersection_requires_both_sides() {
    let h = online("R5CT1234ABC");
    h.transport
        .set_features(Ok("shell_v2,cmd,abb_exec"), Ok("shell_v2,cmd,stat_v2"));
    assert!(!h.session.supports_feature(Feature::AbbExec));
    assert!(h.session.supports_feature(Feature::ShellV2));

    let h = online("R5CT1234ABC");
    h.transport
        .set_features(Ok("shell_v2,abb_exec"), Ok("abb_exec,shell_v2,push_sync"));
    assert!(h.session.supports_feature(Feature::AbbExec));
    assert_eq!(h.session.features().len(), 2);
}

#[test]
fn feature_query_failure_caches_an_empty_set() {
    let h = online("R5CT1234ABC");
    h.transport.set_features(
        Ok("abb_exec"),
        Err(DeviceError::timeout("host-features timed out")),
    );
    assert!(!h.session.supports_feature(Feature::AbbExec));
    assert_eq!(h.transport.feature_queries.load(Ordering::SeqCst), 1);

    h.transport.set_features(Ok("abb_exec"), Ok("abb_exec"));
    assert!(!h.session.supports_feature(Feature::AbbExec));
    assert!(h.session.features().is_empty());
    assert_eq!(h.transport.feature_queries.load(Ordering::SeqCst), 1);
}

#[test]
fn hardware_characteristics_are_read_once() {
    let h = online("R5CT1234ABC");
    assert!(!h.session.supports_hardware_feature(HardwareFeature::Tv));
    h.properties.set(PROP_BUILD_CHARACTERISTICS, "tv,nosdcard");
    assert!(!h.session.supports_hardware_feature(HardwareFeature::Tv));
    assert_eq!(h.properties.requests(PROP_BUILD_CHARACTERISTICS), 1);

    let h = online("R5CT1234ABC");
    h.properties.set(PROP_BUILD_CHARACTERISTICS, "watch,nosdcard");
    assert!(h.session.supports_hardware_feature(HardwareFeature::Watch));
    assert!(!h.session.supports_hardware_feature(HardwareFeature::Automotive));
    assert_eq!(h.properties.requests(PROP_BUILD_CHARACTERISTICS), 1);
}

#[test]
fn screen_recorder_probe_is_cached_even_when_it_fails() {
    let h = online("R5CT1234ABC");
    h.properties.set(PROP_BUILD_API_LEVEL, "34");
    h.transport.script(
        "ls /system/bin/screenrecord",
        vec![
            Err(DeviceError::unresponsive("no output")),
            Ok("/system/bin/screenrecord\n".to_string()),
        ],
    );
    assert!(!h.session.supports_feature(Feature::ScreenRecord));
    assert!(!h.session.supports_feature(Feature::ScreenRecord));
    assert_eq!(h.transport.count("ls "), 1);
}

#[test]
fn screen_recorder_needs_api_19_and_the_binary() {
    let h = online("R5CT1234ABC");
    h.properties.set(PROP_BUILD_API_LEVEL, "18");
    assert!(!h.session.supports_feature(Feature::ScreenRecord));
    assert!(!h.session.supports_feature(Feature::Procstats));
    assert_eq!(h.transport.count("ls "), 0);

    let h = online("R5CT1234ABC");
    h.properties.set(PROP_BUILD_API_LEVEL, "30");
    h.transport.script(
        "ls /system/bin/screenrecord",
        vec![Ok("ls: /system/bin/screenrecord: No such file or directory\n".to_string())],
    );
    assert!(!h.session.supports_feature(Feature::ScreenRecord));
    assert!(h.session.supports_feature(Feature::Procstats));

    let h = online("R5CT1234ABC");
    h.properties.set(PROP_BUILD_API_LEVEL, "30");
    h.transport.script(
        "ls /system/bin/screenrecord",
        vec![Ok("/system/bin/screenrecord\n".to_string())],
    );
    assert!(h.session.supports_feature(Feature::ScreenRecord));
    let call = h.transport.calls().pop().expect("probe");
    assert_eq!(
        call.timeouts.max_time_to_first_response,
        Some(Duration::from_millis(2_000))
    );
}

#[test]
fn mount_point_failures_are_retried() {
    let h = online("R5CT1234ABC");
    h.transport.script(
        "echo $EXTERNAL_STORAGE",
        vec![
            Err(DeviceError::unresponsive("no output")),
            Ok("\n/sdcard\n\n".to_string()),
        ],
    );
    assert_eq!(h.session.mount_point(EXTERNAL_STORAGE), None);
    assert_eq!(
        h.session.mount_point(EXTERNAL_STORAGE).as_deref(),
        Some("/sdcard")
    );
    assert_eq!(
        h.session.mount_point(EXTERNAL_STORAGE).as_deref(),
        Some("/sdcard")
    );
    assert_eq!(h.transport.count("echo $EXTERNAL_STORAGE"), 2);
}

#[test]
fn only_a_positive_root_answer_is_cached() {
    let h = online("R5CT1234ABC");
    h.transport.script(
        "echo $USER_ID",
        vec![
            Err(DeviceError::timeout("no answer")),
            Ok("2000\n".to_string()),
            Ok("0\n".to_string()),
        ],
    );
    assert!(!h.session.is_root());
    assert!(!h.session.is_root());
    assert!(h.session.is_root());
    assert!(h.session.is_root());
    assert_eq!(h.transport.count("echo $USER_ID"), 3);
    let call = h.transport.calls().pop().expect("probe");
    assert_eq!(
        call.timeouts.max_time_to_first_response,
        Some(Duration::from_millis(1_000))
    );
}

// ---- client registry ----

#[test]
fn concurrent_adds_are_not_lost() {
    let h = online("R5CT1234ABC");
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|index| {
            let session = Arc::clone(&h.session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let pid = 1000 + index as u32;
                let client = Client::new(&session, pid, format!("com.example.app{index}"));
                barrier.wait();
                session.add_client(client);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    assert_eq!(h.session.clients().len(), threads);
    for index in 0..threads {
        assert_eq!(
            h.session.client_name(1000 + index as u32),
            format!("com.example.app{index}")
        );
    }
    assert_eq!(h.session.client_name(42), UNKNOWN_CLIENT_NAME);
}

#[test]
fn removal_notifies_tracker_broadcaster_then_listener_once() {
    let h = online("R5CT1234ABC");
    let listener_log = Arc::clone(&h.events);
    h.session
        .set_client_listener(Some(Arc::new(move |event: &ClientEvent| {
            if let ClientEvent::Removed(client) = event {
                push_log(&listener_log, format!("listener:{}", client.pid()));
            }
        })));
    let client = Client::new(&h.session, 4242, "com.example.app");
    h.session.add_client(Arc::clone(&client));
    assert!(h.session.has_clients());

    h.session.remove_client(&client, true);
    h.session.remove_client(&client, true);

    let events = h.events.lock().expect("events").clone();
    assert_eq!(
        events,
        vec![
            "tracker:4242".to_string(),
            format!("device:R5CT1234ABC:{}", ChangeMask::CLIENT_LIST.bits()),
            "listener:4242".to_string(),
        ]
    );
    assert!(!h.session.has_clients());
    assert_eq!(h.session.client_name(4242), UNKNOWN_CLIENT_NAME);
}

#[test]
fn silent_removal_still_informs_the_tracker() {
    let h = online("R5CT1234ABC");
    let client = Client::new(&h.session, 7, "com.example.silent");
    h.session.add_client(Arc::clone(&client));
    h.session.remove_client(&client, false);
    assert_eq!(*h.events.lock().expect("events"), vec!["tracker:7".to_string()]);
}

#[test]
fn client_updates_refresh_index_and_broadcast() {
    let h = online("R5CT1234ABC");
    let updates = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&updates);
    h.session
        .set_client_listener(Some(Arc::new(move |event: &ClientEvent| {
            if matches!(event, ClientEvent::Updated(_, mask) if mask.contains(ChangeMask::NAME)) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })));
    let client = Client::new(&h.session, 99, "<pre-initialized>");
    h.session.add_client(Arc::clone(&client));
    h.session
        .update_client(&client, Some("com.example.late"), ChangeMask::NAME);

    assert_eq!(h.session.client_name(99), "com.example.late");
    assert!(h.session.client("com.example.late").is_some());
    assert!(h.session.client("<pre-initialized>").is_none());
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(
        *h.events.lock().expect("events"),
        vec![format!("client:99:{}", ChangeMask::NAME.bits())]
    );
    let owner = client.session().expect("session alive");
    assert_eq!(owner.serial(), "R5CT1234ABC");
}

#[test]
fn clearing_empties_list_and_index() {
    let h = online("R5CT1234ABC");
    for pid in [1, 2, 3] {
        h.session
            .add_client(Client::new(&h.session, pid, format!("proc{pid}")));
    }
    h.session.clear_client_list();
    assert!(!h.session.has_clients());
    assert_eq!(h.session.client_name(2), UNKNOWN_CLIENT_NAME);
}

// ---- command facade ----

#[test]
fn shell_shapes_forward_their_budgets() {
    let h = online("R5CT1234ABC");
    let mut receiver = NullReceiver;
    h.session
        .execute_shell_command("id", &mut receiver)
        .expect("default");
    h.session
        .execute_shell_command_with_response_timeout("id", &mut receiver, Duration::from_secs(1))
        .expect("first response");
    h.session
        .execute_shell_command_with_timeouts(
            "id",
            &mut receiver,
            Duration::from_secs(9),
            Duration::from_secs(3),
        )
        .expect("both");

    let calls = h.transport.calls();
    assert_eq!(
        calls[0].timeouts,
        ShellTimeouts::first_response(Duration::from_millis(5_000))
    );
    assert_eq!(
        calls[1].timeouts,
        ShellTimeouts::first_response(Duration::from_secs(1))
    );
    assert_eq!(
        calls[2].timeouts,
        ShellTimeouts::bounded(Duration::from_secs(9), Duration::from_secs(3))
    );
    assert!(calls.iter().all(|call| call.service == ShellService::Shell));
}

#[test]
fn shell_with_input_uses_exec_service() {
    let h = online("R5CT1234ABC");
    let mut receiver = CollectingReceiver::new();
    let mut input: &[u8] = b"payload";
    h.session
        .execute_shell_command_with_input(
            "cat > /data/local/tmp/blob",
            &mut receiver,
            Duration::from_secs(5),
            Duration::from_secs(5),
            &mut input,
        )
        .expect("exec");
    let call = h.transport.calls().pop().expect("call");
    assert_eq!(call.service, ShellService::Exec);
    assert_eq!(call.input.as_deref(), Some(&b"payload"[..]));
}

#[test]
fn shell_failures_propagate_unchanged() {
    let h = online("R5CT1234ABC");
    h.transport
        .script("dumpsys", vec![Err(DeviceError::unresponsive("silent"))]);
    let err = h
        .session
        .execute_shell_command("dumpsys activity", &mut NullReceiver)
        .expect_err("unresponsive");
    assert_eq!(err.kind, ErrorKind::ShellUnresponsive);
    assert_eq!(h.transport.count("dumpsys"), 1);
}

#[test]
fn binder_command_uses_abb_exec_when_available() {
    let h = online("R5CT1234ABC");
    h.transport.set_features(Ok("abb_exec"), Ok("abb_exec"));
    h.session
        .execute_binder_command(
            &["pm", "list", "packages"],
            &mut NullReceiver,
            Duration::from_secs(5),
            None,
        )
        .expect("abb");
    let call = h.transport.calls().pop().expect("call");
    assert_eq!(call.service, ShellService::AbbExec);
    assert_eq!(call.command, "pm\0list\0packages");
}

#[test]
fn binder_command_falls_back_to_cmd() {
    let h = online("R5CT1234ABC");
    h.transport.set_features(Ok("shell_v2"), Ok("abb_exec"));
    h.session
        .execute_binder_command(
            &["pm", "list", "packages"],
            &mut NullReceiver,
            Duration::from_secs(5),
            None,
        )
        .expect("cmd");
    let call = h.transport.calls().pop().expect("call");
    assert_eq!(call.service, ShellService::Shell);
    assert_eq!(call.command, "cmd pm list packages");

    let mut input: &[u8] = b"data";
    h.session
        .execute_binder_command(
            &["package", "install-write"],
            &mut NullReceiver,
            Duration::from_secs(5),
            Some(&mut input as &mut dyn Read),
        )
        .expect("cmd with input");
    let call = h.transport.calls().pop().expect("call");
    assert_eq!(call.service, ShellService::Exec);
    assert_eq!(call.input.as_deref(), Some(&b"data"[..]));
}

#[test]
fn screen_recorder_runs_unbounded() {
    let h = online("R5CT1234ABC");
    let options = ScreenRecorderOptions {
        time_limit: Some(Duration::from_secs(10)),
        ..ScreenRecorderOptions::default()
    };
    h.session
        .start_screen_recorder("/sdcard/demo.mp4", &options, &mut NullReceiver)
        .expect("record");
    let call = h.transport.calls().pop().expect("call");
    assert_eq!(call.command, "screenrecord --time-limit 10 '/sdcard/demo.mp4'");
    assert_eq!(call.timeouts, ShellTimeouts::unbounded());
}

// ---- install workflows ----

#[test]
fn failed_install_still_cleans_up_and_records_metrics() {
    let h = online("R5CT1234ABC");
    let dir = TempDir::new().expect("tmp");
    let apk = local_apk(&dir, "app-debug.apk");
    h.transport.script(
        "pm install",
        vec![Ok(
            "Performing Streamed Install\nFailure [INSTALL_FAILED_OLDER_SDK: Requires newer sdk version #34]\n"
                .to_string(),
        )],
    );

    let err = h
        .session
        .install_package(&apk, false, &[])
        .expect_err("install failure");
    assert_eq!(err.kind, ErrorKind::InstallFailure);
    assert_eq!(err.error_code.as_deref(), Some("INSTALL_FAILED_OLDER_SDK"));
    assert!(err.message.contains("Requires newer sdk version"));

    assert_eq!(
        h.transport.commands(),
        vec![
            "pm install '/data/local/tmp/app-debug.apk'".to_string(),
            "rm '/data/local/tmp/app-debug.apk'".to_string(),
        ]
    );
    let sync_log = h.sync_log.lock().expect("sync log").clone();
    assert_eq!(sync_log.first().map(String::as_str), Some("open"));
    assert_eq!(sync_log.last().map(String::as_str), Some("close"));

    let metrics = h.session.last_install_metrics().expect("metrics");
    assert!(metrics.upload_started <= metrics.upload_finished);
    assert!(metrics.upload_finished <= metrics.install_finished);
}

#[test]
fn successful_install_overwrites_metrics() {
    let h = online("R5CT1234ABC");
    let dir = TempDir::new().expect("tmp");
    let apk = local_apk(&dir, "app.apk");
    h.transport
        .script("pm install", vec![Ok("Success\n".to_string())]);

    h.session
        .install_package(&apk, true, &["-t".to_string()])
        .expect("install");
    let first = h.session.last_install_metrics().expect("metrics");
    h.session
        .install_package(&apk, true, &["-t".to_string()])
        .expect("install again");
    let second = h.session.last_install_metrics().expect("metrics");
    assert!(second.upload_started >= first.install_finished);
    assert_eq!(
        h.transport.commands()[0],
        "pm install -r -t '/data/local/tmp/app.apk'"
    );
}

#[test]
fn transport_failures_during_install_become_install_failures() {
    let h = online("R5CT1234ABC");
    let dir = TempDir::new().expect("tmp");
    let apk = local_apk(&dir, "app.apk");
    h.transport
        .script("pm install", vec![Err(DeviceError::rejected("device offline"))]);

    let err = h
        .session
        .install_package(&apk, false, &[])
        .expect_err("wrapped");
    assert_eq!(err.kind, ErrorKind::InstallFailure);
    assert_eq!(
        err.cause.as_deref().map(|cause| cause.kind),
        Some(ErrorKind::CommandRejected)
    );
    assert_eq!(h.transport.count("rm "), 1);
}

#[test]
fn upload_failure_is_wrapped_and_skips_install() {
    let h = online("R5CT1234ABC");
    let dir = TempDir::new().expect("tmp");
    let apk = local_apk(&dir, "app.apk");
    h.sync.fail_transfers.store(true, Ordering::SeqCst);

    let err = h
        .session
        .install_package(&apk, false, &[])
        .expect_err("upload failure");
    assert_eq!(err.kind, ErrorKind::InstallFailure);
    assert_eq!(
        err.cause.as_deref().map(|cause| cause.kind),
        Some(ErrorKind::SyncFailure)
    );
    assert_eq!(h.transport.count("pm install"), 0);
}

#[test]
fn remote_install_leaves_the_staged_file() {
    let h = online("R5CT1234ABC");
    h.transport
        .script("pm install", vec![Ok("Success\n".to_string())]);
    h.session
        .install_remote_package("/data/local/tmp/base.apk", false, &[])
        .expect("install");
    assert_eq!(h.transport.count("rm "), 0);
    let metrics = h.session.last_install_metrics().expect("metrics");
    assert_eq!(metrics.upload_started, metrics.upload_finished);
}

#[test]
fn uninstall_reports_failures_as_data() {
    let h = online("R5CT1234ABC");
    h.transport.script(
        "pm uninstall",
        vec![
            Ok("Failure [DELETE_FAILED_INTERNAL_ERROR]\n".to_string()),
            Ok("Success\n".to_string()),
            Err(DeviceError::timeout("no answer")),
        ],
    );
    assert_eq!(
        h.session
            .uninstall_package("com.example.app")
            .expect("parsed failure")
            .as_deref(),
        Some("DELETE_FAILED_INTERNAL_ERROR")
    );
    assert_eq!(h.session.uninstall_package("com.example.app").expect("ok"), None);
    let err = h
        .session
        .uninstall_package("com.example.app")
        .expect_err("timeout");
    assert_eq!(err.kind, ErrorKind::InstallFailure);
}

#[test]
fn uninstall_refuses_names_that_are_not_packages() {
    let h = online("R5CT1234ABC");
    let err = h
        .session
        .uninstall_package("com.example.app; reboot")
        .expect_err("invalid name");
    assert_eq!(err.kind, ErrorKind::InstallFailure);
    assert!(h.transport.calls().is_empty());
}

#[test]
fn staged_file_names_are_not_expanded_by_the_device_shell() {
    let h = online("R5CT1234ABC");
    let dir = TempDir::new().expect("tmp");
    let apk = local_apk(&dir, "app$1.apk");
    h.transport
        .script("pm install", vec![Ok("Success\n".to_string())]);
    h.session
        .install_package(&apk, false, &[])
        .expect("install");
    assert_eq!(
        h.transport.commands(),
        vec![
            "pm install '/data/local/tmp/app$1.apk'".to_string(),
            "rm '/data/local/tmp/app$1.apk'".to_string(),
        ]
    );
}

#[test]
fn split_installs_rewrap_failures_and_store_metrics() {
    let h = online("R5CT1234ABC");
    h.session
        .install_packages(
            &[PathBuf::from("base.apk"), PathBuf::from("split_config.arm64.apk")],
            true,
            &[],
        )
        .expect("split install");
    assert!(h.session.last_install_metrics().is_some());
    assert_eq!(h.split.artifacts.lock().expect("artifacts").len(), 2);

    *h.split.failure.lock().expect("failure") = Some(DeviceError::io("session abandoned"));
    let err = h
        .session
        .install_remote_packages(&["/data/local/tmp/base.apk".to_string()], false, &[])
        .expect_err("wrapped");
    assert_eq!(err.kind, ErrorKind::InstallFailure);
    assert_eq!(
        err.cause.as_deref().map(|cause| cause.kind),
        Some(ErrorKind::Io)
    );
}

// ---- file transfer ----

#[test]
fn sync_acquisition_failure_is_io_per_direction() {
    let h = online("R5CT1234ABC");
    h.sync.available.store(false, Ordering::SeqCst);

    let err = h
        .session
        .push_file(Path::new("/tmp/a"), "/sdcard/a")
        .expect_err("no sync");
    assert_eq!(err.kind, ErrorKind::Io);
    assert!(err.message.contains("push"));

    let err = h
        .session
        .pull_file("/sdcard/a", Path::new("/tmp/a"))
        .expect_err("no sync");
    assert_eq!(err.kind, ErrorKind::Io);
    assert!(err.message.contains("pull"));
}

#[test]
fn sync_session_is_closed_after_failure() {
    let h = online("R5CT1234ABC");
    h.sync.fail_transfers.store(true, Ordering::SeqCst);
    let err = h
        .session
        .pull_file("/sdcard/a", Path::new("/tmp/a"))
        .expect_err("sync failure");
    assert_eq!(err.kind, ErrorKind::SyncFailure);
    assert_eq!(
        *h.sync_log.lock().expect("sync log"),
        vec![
            "open".to_string(),
            "pull:/sdcard/a->/tmp/a".to_string(),
            "close".to_string(),
        ]
    );
}

#[test]
fn sync_package_returns_the_staged_path() {
    let h = online("R5CT1234ABC");
    let dir = TempDir::new().expect("tmp");
    let apk = local_apk(&dir, "demo.apk");
    let remote = h.session.sync_package_to_device(&apk).expect("sync");
    assert_eq!(remote, "/data/local/tmp/demo.apk");
    let sync_log = h.sync_log.lock().expect("sync log").clone();
    assert_eq!(sync_log.len(), 3);
    assert!(sync_log[1].ends_with("->/data/local/tmp/demo.apk"));
}
