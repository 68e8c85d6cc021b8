use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::mutants::{Mutation, MutationOutcome};

/// Exit code test runners use to report that no test exercised the code
/// (pytest's "no tests collected").
pub const NO_COVERAGE_EXIT_CODE: i32 = 5;
/// Characters of stdout/stderr kept per stream. The tail is kept.
pub const MAX_OUTPUT_CHARS: usize = 5000;
/// How long a timed-out process gets between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long readers get to drain after SIGKILL before their output is dropped.
const ABANDON_AFTER_KILL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub timeout: Duration,
    pub grace: Duration,
    /// `None` keeps the full output.
    pub max_output: Option<usize>,
    pub working_dir: Option<PathBuf>,
}

impl ExecOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            grace: DEFAULT_GRACE,
            max_output: Some(MAX_OUTPUT_CHARS),
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn full_output(mut self) -> Self {
        self.max_output = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestExecution {
    pub passed: bool,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// `None` when the process could not be spawned or died from a signal.
    pub exit_code: Option<i32>,
}

impl TestExecution {
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Run a shell test command with a timeout, in `working_dir`.
pub fn execute_tests(command: &str, working_dir: &Path, timeout: Duration) -> TestExecution {
    run_shell(command, &ExecOptions::new(timeout).in_dir(working_dir), None)
}

/// Run `command` through the platform shell.
///
/// The timeout covers the whole process group, including background
/// processes still holding stdout or stderr after the shell exits. On
/// expiry the group gets SIGTERM, then SIGKILL once `grace` has passed.
/// Spawn failures come back as a failed, non-timed-out execution with the
/// error in `stderr`.
pub fn run_shell(command: &str, options: &ExecOptions, stdin: Option<&str>) -> TestExecution {
    let start = Instant::now();
    let mut cmd = shell(command);
    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return TestExecution {
                passed: false,
                duration_ms: start.elapsed().as_millis() as u64,
                stdout: String::new(),
                stderr: format!("failed to run `{command}`: {e}"),
                timed_out: false,
                exit_code: None,
            };
        }
    };

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_owned();
        thread::spawn(move || {
            let _ = pipe.write_all(input.as_bytes());
        });
    }
    let keep = options.max_output.map(|chars| chars * 4 + 4);
    let (tx, rx) = mpsc::channel();
    let mut pending = 0;
    pending += spawn_reader(Pipe::Stdout, child.stdout.take(), keep, tx.clone()) as usize;
    pending += spawn_reader(Pipe::Stderr, child.stderr.take(), keep, tx) as usize;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut status = None;
    let mut timed_out = false;
    let mut terminated_at: Option<Instant> = None;
    let mut killed_at: Option<Instant> = None;

    loop {
        if status.is_none() {
            match child.try_wait() {
                Ok(s) => status = s,
                Err(e) => {
                    tracing::warn!(command, error = %e, "failed to poll test process");
                    force_kill(&mut child);
                    status = child.wait().ok();
                    killed_at.get_or_insert_with(Instant::now);
                }
            }
        }
        if status.is_some() && pending == 0 {
            break;
        }

        match terminated_at {
            None if start.elapsed() >= options.timeout => {
                tracing::debug!(command, "timed out, sending SIGTERM");
                timed_out = true;
                terminate(&mut child);
                terminated_at = Some(Instant::now());
            }
            Some(at) if killed_at.is_none() && at.elapsed() >= options.grace => {
                tracing::debug!(command, "still alive after grace period, killing");
                force_kill(&mut child);
                killed_at = Some(Instant::now());
            }
            _ => {}
        }
        if let Some(at) = killed_at {
            if status.is_none() {
                status = child.wait().ok();
            }
            if pending > 0 && at.elapsed() >= ABANDON_AFTER_KILL {
                tracing::warn!(command, "output pipes still open after kill, abandoning readers");
                break;
            }
        }

        if pending == 0 {
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok((pipe, buf)) => {
                pending -= 1;
                match pipe {
                    Pipe::Stdout => stdout = buf,
                    Pipe::Stderr => stderr = buf,
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => pending = 0,
        }
    }

    let limit = options.max_output;
    let stdout = truncate_tail(&String::from_utf8_lossy(&stdout), limit);
    let stderr = truncate_tail(&String::from_utf8_lossy(&stderr), limit);
    let exit_code = status.and_then(|s| s.code());

    TestExecution {
        passed: !timed_out && exit_code == Some(0),
        duration_ms: start.elapsed().as_millis() as u64,
        stdout,
        stderr,
        timed_out,
        exit_code,
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(child.id() as i32), signal);
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

fn force_kill(child: &mut Child) {
    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGKILL);
    let _ = child.kill();
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Read `stream` to EOF on its own thread, keeping at most about `keep`
/// trailing bytes, and send the result once the pipe closes.
fn spawn_reader<R: Read + Send + 'static>(
    pipe: Pipe,
    stream: Option<R>,
    keep: Option<usize>,
    tx: Sender<(Pipe, Vec<u8>)>,
) -> bool {
    let Some(mut stream) = stream else {
        return false;
    };
    thread::spawn(move || {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(keep) = keep {
                        if buf.len() > keep * 2 {
                            buf.drain(..buf.len() - keep);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send((pipe, buf));
    });
    true
}

/// Keep the last `limit` characters; failure detail is usually at the end.
pub fn truncate_tail(output: &str, limit: Option<usize>) -> String {
    let Some(limit) = limit else {
        return output.to_string();
    };
    if limit == 0 {
        return String::new();
    }
    match output.char_indices().rev().nth(limit - 1) {
        Some((idx, _)) if idx > 0 => format!("...(truncated)\n{}", &output[idx..]),
        _ => output.to_string(),
    }
}

/// Run the test command once against unmodified code. Any failure is fatal:
/// scores measured against a red baseline mean nothing.
pub fn run_preflight(command: &str, working_dir: &Path, timeout: Duration) -> Result<()> {
    let result = execute_tests(command, working_dir, timeout);
    if result.timed_out {
        return Err(Error::Preflight {
            message: "Pre-flight test run timed out. Ensure the test suite completes within the timeout."
                .to_string(),
            output: result.combined_output(),
        });
    }
    if !result.passed {
        return Err(Error::Preflight {
            message: "Pre-flight test run failed. Tests must pass on unmodified code before mutation testing."
                .to_string(),
            output: result.combined_output(),
        });
    }
    Ok(())
}

/// Whether the mutation's `original_code` matches the file's lines in range,
/// ignoring surrounding whitespace.
pub fn validate_original_code(content: &str, mutation: &Mutation) -> bool {
    let lines: Vec<&str> = content.split('\n').collect();
    let (start, end) = (mutation.start_line, mutation.end_line);
    if start == 0 || start > end || end > lines.len() {
        return false;
    }
    lines[start - 1..end].join("\n").trim() == mutation.original_code.trim()
}

/// Replace the inclusive line range with `mutated_code`, which may span
/// any number of lines.
pub fn apply_mutation_to_content(content: &str, mutation: &Mutation) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let start = mutation.start_line.saturating_sub(1).min(lines.len());
    let end = mutation.end_line.clamp(start, lines.len());
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend_from_slice(&lines[..start]);
    out.extend(mutation.mutated_code.split('\n'));
    out.extend_from_slice(&lines[end..]);
    out.join("\n")
}

pub fn classify_outcome(result: &TestExecution) -> MutationOutcome {
    if result.timed_out {
        MutationOutcome::Timeout
    } else if result.exit_code == Some(NO_COVERAGE_EXIT_CODE) {
        MutationOutcome::NoCoverage
    } else if result.passed {
        MutationOutcome::Survived
    } else {
        MutationOutcome::Killed
    }
}

pub fn generate_diff(original: &str, mutated: &str) -> String {
    use similar::TextDiff;
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                output.push_str(&format!("- {}", change));
            }
            similar::ChangeTag::Insert => {
                output.push_str(&format!("+ {}", change));
            }
            _ => {}
        }
    }
    output
}
