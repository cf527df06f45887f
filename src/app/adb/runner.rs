use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::app::adb::collaborators::ShellTimeouts;
use crate::app::error::DeviceError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub fn run_command(program: &str, args: &[String]) -> Result<CommandOutput, DeviceError> {
    run_command_with_timeout(program, args, Duration::from_secs(10))
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, DeviceError> {
    run_command_with_limits(
        program,
        args,
        ShellTimeouts {
            max_timeout: Some(timeout),
            max_time_to_first_response: None,
        },
        None,
    )
}

fn spawn_drain<R: Read + Send + 'static>(
    source: R,
    first_output: Arc<AtomicBool>,
) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut reader = source;
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => {
                    first_output.store(true, Ordering::Relaxed);
                    buffer.extend_from_slice(&temp[..count]);
                }
                Err(_) => break,
            }
        }
        buffer
    })
}

/// Runs a child process under both budgets of `limits`.
///
/// Exceeding `max_timeout` yields `Timeout`; producing no output at all within
/// `max_time_to_first_response` yields `ShellUnresponsive`. `input` is read to
/// the end up front and written to the child's stdin.
pub fn run_command_with_limits(
    program: &str,
    args: &[String],
    limits: ShellTimeouts,
    input: Option<&mut dyn Read>,
) -> Result<CommandOutput, DeviceError> {
    let stdin_payload = match input {
        Some(reader) => {
            let mut payload = Vec::new();
            reader
                .read_to_end(&mut payload)
                .map_err(|err| DeviceError::io(format!("Failed to read command input: {err}")))?;
            Some(payload)
        }
        None => None,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| DeviceError::io(format!("Failed to spawn command: {err}")))?;

    // Drain stdout/stderr in parallel; otherwise, a chatty child process can block once the pipe
    // buffer fills, and we will incorrectly hit the timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DeviceError::io("Failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| DeviceError::io("Failed to capture stderr"))?;

    let first_output = Arc::new(AtomicBool::new(false));
    let stdout_handle = spawn_drain(stdout, Arc::clone(&first_output));
    let stderr_handle = spawn_drain(stderr, Arc::new(AtomicBool::new(false)));

    let stdin_handle = match (stdin_payload, child.stdin.take()) {
        (Some(payload), Some(mut stdin)) => Some(std::thread::spawn(move || {
            // Dropping stdin afterwards closes the pipe so the child sees EOF.
            let _ = stdin.write_all(&payload);
        })),
        _ => None,
    };

    let join_all = |stdout_handle: JoinHandle<Vec<u8>>, stderr_handle: JoinHandle<Vec<u8>>| {
        let stdout_bytes = stdout_handle.join().unwrap_or_default();
        let stderr_bytes = stderr_handle.join().unwrap_or_default();
        (stdout_bytes, stderr_bytes)
    };

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                let elapsed = start.elapsed();
                let timed_out = limits.max_timeout.is_some_and(|limit| elapsed > limit);
                let unresponsive = !first_output.load(Ordering::Relaxed)
                    && limits
                        .max_time_to_first_response
                        .is_some_and(|limit| elapsed > limit);
                if timed_out || unresponsive {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = join_all(stdout_handle, stderr_handle);
                    debug!(program = %program, elapsed_ms = elapsed.as_millis() as u64, "killed command over budget");
                    return Err(if timed_out {
                        DeviceError::timeout("Command timed out")
                    } else {
                        DeviceError::unresponsive("Command produced no output in time")
                    });
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = join_all(stdout_handle, stderr_handle);
                return Err(DeviceError::io(format!("Failed to poll command: {err}")));
            }
        }
    };

    if let Some(handle) = stdin_handle {
        let _ = handle.join();
    }
    let (stdout_bytes, stderr_bytes) = join_all(stdout_handle, stderr_handle);

    Ok(CommandOutput {
        stdout: stdout_bytes,
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}
