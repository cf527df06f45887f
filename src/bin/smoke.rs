use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use device_session::app::adb::locator::locate_adb;
use device_session::app::adb::parse::parse_adb_devices;
use device_session::app::adb::receiver::CollectingReceiver;
use device_session::app::adb::runner::run_command;
use device_session::app::device::EXTERNAL_STORAGE;
use device_session::{
    init_logging, load_config, DeviceSession, DeviceState, Feature, SessionConfig,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Args {
    serial: Option<String>,
    json: bool,
    apk_path: Option<PathBuf>,
    apk_replace: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    serial: Option<String>,
    adb_program: Option<String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|warn|skip
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn usage() -> &'static str {
    "Usage: smoke [--serial SERIAL] [--json] [--apk PATH] [--apk-replace]\n\
     \n\
     Runs read-only capability checks against one online device. With --apk the\n\
     package is also installed and its timings reported."
}

fn parse_args() -> Result<Args, String> {
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|value| !value.trim().is_empty());
    let mut json = false;
    let mut apk_path = None;
    let mut apk_replace = false;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--serial" => {
                serial = Some(iter.next().ok_or("--serial requires a value")?);
            }
            "--json" => json = true,
            "--apk" => {
                apk_path = Some(PathBuf::from(iter.next().ok_or("--apk requires a path")?));
            }
            "--apk-replace" => apk_replace = true,
            "-h" | "--help" => return Err(usage().to_string()),
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    if apk_replace && apk_path.is_none() {
        return Err("--apk-replace requires --apk".to_string());
    }

    Ok(Args {
        serial,
        json,
        apk_path,
        apk_replace,
    })
}

fn pick_single_device(adb_program: &str) -> Result<(String, DeviceState), String> {
    let args = vec!["devices".to_string(), "-l".to_string()];
    let out = run_command(adb_program, &args).map_err(|err| err.to_string())?;
    if !out.success() {
        return Err(format!("adb devices failed: {}", out.stderr.trim()));
    }
    let online: Vec<_> = parse_adb_devices(&out.stdout_text())
        .into_iter()
        .filter(|d| d.state == "device")
        .collect();
    match online.as_slice() {
        [] => Err("No online adb devices found.".to_string()),
        [only] => Ok((only.serial.clone(), DeviceState::Online)),
        many => {
            let serials = many
                .iter()
                .map(|d| d.serial.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Err(format!(
                "Multiple online devices found ({serials}). Set ANDROID_SERIAL or pass --serial."
            ))
        }
    }
}

fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F) -> Result<(), ()>
where
    F: FnOnce() -> Result<(String, Option<String>), (&'static str, String)>,
{
    let start = Instant::now();
    match f() {
        Ok((detail, warning)) => {
            checks.push(SmokeCheck {
                name,
                status: if warning.is_some() { "warn" } else { "pass" },
                duration_ms: start.elapsed().as_millis(),
                detail: Some(detail),
                error_code: warning.as_ref().map(|_| "WARN"),
                error: warning,
            });
            Ok(())
        }
        Err((code, err)) => {
            checks.push(SmokeCheck {
                name,
                status: "fail",
                duration_ms: start.elapsed().as_millis(),
                detail: None,
                error_code: Some(code),
                error: Some(err),
            });
            Err(())
        }
    }
}

fn finish(summary: SmokeSummary, json: bool) -> ! {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    } else {
        println!("{} [{}] trace_id={}", summary.tool, summary.status, summary.trace_id);
        for check in &summary.checks {
            let note = check
                .error
                .as_deref()
                .or(check.detail.as_deref())
                .unwrap_or("");
            println!(
                "  {:<16} {:<5} {:>6}ms  {note}",
                check.name, check.status, check.duration_ms
            );
        }
    }
    std::process::exit(if summary.status == "fail" { 1 } else { 0 });
}

fn device_checks(session: &Arc<DeviceSession>, args: &Args, checks: &mut Vec<SmokeCheck>) -> bool {
    let mut ok = true;

    ok &= run_check(checks, "version", || {
        let version = session.version();
        if version.api_level <= 1 {
            return Err(("ERR_VERSION", "API level could not be read".to_string()));
        }
        Ok((version.to_string(), None))
    })
    .is_ok();

    ok &= run_check(checks, "display_name", || Ok((session.display_name(), None))).is_ok();

    ok &= run_check(checks, "features", || {
        let features = session.features();
        let mut tokens: Vec<_> = features.iter().cloned().collect();
        tokens.sort();
        let warning = (!session.supports_feature(Feature::AbbExec))
            .then(|| "abb_exec unavailable; binder commands use cmd".to_string());
        Ok((tokens.join(","), warning))
    })
    .is_ok();

    ok &= run_check(checks, "root", || Ok((session.is_root().to_string(), None))).is_ok();

    ok &= run_check(checks, "external_storage", || {
        session
            .mount_point(EXTERNAL_STORAGE)
            .map(|path| (path, None))
            .ok_or(("ERR_MOUNT_POINT", "EXTERNAL_STORAGE is not set".to_string()))
    })
    .is_ok();

    ok &= run_check(checks, "battery", || {
        Ok(match session.battery_level() {
            Some(level) => (format!("{level}%"), None),
            None => (String::new(), Some("battery level unavailable".to_string())),
        })
    })
    .is_ok();

    ok &= run_check(checks, "shell", || {
        let mut receiver = CollectingReceiver::new();
        session
            .execute_shell_command("echo smoke", &mut receiver)
            .map_err(|err| (err.code(), err.to_string()))?;
        let output = receiver.output();
        if output.trim() != "smoke" {
            return Err(("ERR_SHELL", format!("unexpected echo output: {output:?}")));
        }
        Ok((output.trim().to_string(), None))
    })
    .is_ok();

    match &args.apk_path {
        Some(apk) => {
            ok &= run_check(checks, "install", || {
                session
                    .install_package(apk, args.apk_replace, &[])
                    .map_err(|err| (err.code(), err.to_string()))?;
                let detail = session
                    .last_install_metrics()
                    .map(|metrics| {
                        format!(
                            "upload {}ms, install {}ms",
                            metrics.upload_duration().as_millis(),
                            metrics.install_duration().as_millis()
                        )
                    })
                    .unwrap_or_default();
                Ok((detail, None))
            })
            .is_ok();
        }
        None => checks.push(SmokeCheck {
            name: "install",
            status: "skip",
            duration_ms: 0,
            detail: None,
            error_code: None,
            error: None,
        }),
    }

    ok
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let mut checks: Vec<SmokeCheck> = Vec::new();
    let mut summary = SmokeSummary {
        tool: "device_session_smoke",
        status: "fail",
        trace_id,
        serial: args.serial.clone(),
        adb_program: None,
        checks: Vec::new(),
    };

    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "load_config",
                status: "warn",
                duration_ms: 0,
                detail: None,
                error_code: Some(err.code()),
                error: Some(err.to_string()),
            });
            SessionConfig::default()
        }
    };
    init_logging(&config.logging);

    let adb_program = match locate_adb(&config.adb) {
        Ok(program) => program,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "locate_adb",
                status: "fail",
                duration_ms: 0,
                detail: None,
                error_code: Some(err.code()),
                error: Some(err.to_string()),
            });
            summary.checks = checks;
            finish(summary, args.json);
        }
    };
    summary.adb_program = Some(adb_program.clone());

    let (serial, state) = match args.serial.clone() {
        Some(serial) => (serial, DeviceState::Online),
        None => match pick_single_device(&adb_program) {
            Ok(picked) => picked,
            Err(err) => {
                checks.push(SmokeCheck {
                    name: "pick_device",
                    status: "fail",
                    duration_ms: 0,
                    detail: None,
                    error_code: Some("ERR_PICK_DEVICE"),
                    error: Some(err),
                });
                summary.checks = checks;
                finish(summary, args.json);
            }
        },
    };
    summary.serial = Some(serial.clone());

    let session = match DeviceSession::with_adb(serial, state, config) {
        Ok(session) => session,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "open_session",
                status: "fail",
                duration_ms: 0,
                detail: None,
                error_code: Some(err.code()),
                error: Some(err.to_string()),
            });
            summary.checks = checks;
            finish(summary, args.json);
        }
    };

    let ok = device_checks(&session, &args, &mut checks);
    summary.status = if !ok {
        "fail"
    } else if checks.iter().any(|check| check.status == "warn") {
        "warn"
    } else {
        "pass"
    };
    summary.checks = checks;
    finish(summary, args.json);
}
