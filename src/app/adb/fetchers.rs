//! Asynchronous property and battery readers built on a [`Transport`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::adb::collaborators::{
    BatteryFetcher, PropertyFetcher, ShellRequest, ShellService, ShellTimeouts, Transport,
};
use crate::app::adb::parse::{parse_battery_level, parse_getprop_map};
use crate::app::adb::pending::{Completer, Pending};
use crate::app::adb::receiver::CollectingReceiver;
use crate::app::error::DeviceError;

const READ_ONLY_PREFIX: &str = "ro.";
const DUMP_TIMEOUT: Duration = Duration::from_secs(30);
const DUMP_FIRST_RESPONSE: Duration = Duration::from_secs(5);

fn run_capture(
    transport: &dyn Transport,
    serial: &str,
    command: &str,
) -> Result<String, DeviceError> {
    let mut receiver = CollectingReceiver::new();
    transport.execute(
        serial,
        ShellRequest {
            service: ShellService::Shell,
            command: command.to_string(),
            timeouts: ShellTimeouts::bounded(DUMP_TIMEOUT, DUMP_FIRST_RESPONSE),
            input: None,
        },
        &mut receiver,
    )?;
    Ok(receiver.output())
}

#[derive(Default)]
struct PropertyState {
    values: HashMap<String, String>,
    fetched_at: Option<Instant>,
    waiters: Vec<(String, Completer<Option<String>>)>,
    fetching: bool,
}

/// Serves properties out of one `getprop` dump per refresh period.
///
/// `ro.*` values never change while the device is up, so they are answered from
/// the last dump regardless of age; everything else triggers a new dump once
/// the previous one is older than `refresh`. Concurrent requests share one
/// in-flight dump.
pub struct GetpropFetcher {
    transport: Arc<dyn Transport>,
    serial: String,
    refresh: Duration,
    state: Arc<Mutex<PropertyState>>,
}

impl GetpropFetcher {
    pub fn new(transport: Arc<dyn Transport>, serial: impl Into<String>, refresh: Duration) -> Self {
        Self {
            transport,
            serial: serial.into(),
            refresh,
            state: Arc::new(Mutex::new(PropertyState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PropertyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_dump(&self) {
        let transport = Arc::clone(&self.transport);
        let serial = self.serial.clone();
        let state = Arc::clone(&self.state);
        thread::spawn(move || {
            let result = run_capture(transport.as_ref(), &serial, "getprop")
                .map(|output| parse_getprop_map(&output));
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            guard.fetching = false;
            let waiters = std::mem::take(&mut guard.waiters);
            match result {
                Ok(values) => {
                    debug!(serial = %serial, count = values.len(), "property dump finished");
                    guard.values = values;
                    guard.fetched_at = Some(Instant::now());
                    for (name, completer) in waiters {
                        let value = guard.values.get(&name).cloned();
                        completer.complete(Ok(value));
                    }
                }
                Err(err) => {
                    warn!(serial = %serial, error = %err, "property dump failed");
                    drop(guard);
                    for (_, completer) in waiters {
                        completer.complete(Err(err.clone()));
                    }
                }
            }
        });
    }
}

impl PropertyFetcher for GetpropFetcher {
    fn property(&self, name: &str) -> Pending<Option<String>> {
        let mut state = self.lock();
        if let Some(fetched_at) = state.fetched_at {
            let fresh = fetched_at.elapsed() < self.refresh;
            let pinned = name.starts_with(READ_ONLY_PREFIX) && state.values.contains_key(name);
            if fresh || pinned {
                return Pending::ready(state.values.get(name).cloned());
            }
        }

        let (completer, pending) = Pending::channel();
        state.waiters.push((name.to_string(), completer));
        if !state.fetching {
            state.fetching = true;
            drop(state);
            self.start_dump();
        }
        pending
    }

    fn has_cached_properties(&self) -> bool {
        let state = self.lock();
        state.fetched_at.is_some() && !state.values.is_empty()
    }

    fn cached_property(&self, name: &str) -> Option<String> {
        self.lock().values.get(name).cloned()
    }

    fn cached_properties(&self) -> HashMap<String, String> {
        self.lock().values.clone()
    }
}

/// Reads the battery level from `dumpsys battery`.
pub struct DumpsysBatteryFetcher {
    transport: Arc<dyn Transport>,
    serial: String,
    last: Arc<Mutex<Option<(u8, Instant)>>>,
}

impl DumpsysBatteryFetcher {
    pub fn new(transport: Arc<dyn Transport>, serial: impl Into<String>) -> Self {
        Self {
            transport,
            serial: serial.into(),
            last: Arc::new(Mutex::new(None)),
        }
    }
}

impl BatteryFetcher for DumpsysBatteryFetcher {
    fn battery(&self, freshness: Duration) -> Pending<Option<u8>> {
        let cached = *self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((level, at)) = cached {
            if at.elapsed() < freshness {
                return Pending::ready(Some(level));
            }
        }

        let (completer, pending) = Pending::channel();
        let transport = Arc::clone(&self.transport);
        let serial = self.serial.clone();
        let last = Arc::clone(&self.last);
        thread::spawn(move || {
            let result = run_capture(transport.as_ref(), &serial, "dumpsys battery")
                .map(|output| parse_battery_level(&output));
            if let Ok(Some(level)) = result {
                *last.lock().unwrap_or_else(PoisonError::into_inner) = Some((level, Instant::now()));
            }
            completer.complete(result);
        });
        pending
    }
}
