// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process isolation: running a test in a forked child.
//!
//! The child runs `BeforeEach`, the body and `AfterEach` with no inner deadline and reports its
//! outcome through its exit code: 0 for a pass, 1 for a failure and 2 for a skip. Everything it
//! writes to stdout or stderr is captured through a pipe and becomes the test's message. The
//! parent polls the child without blocking and kills it with `SIGKILL` once its deadline (the
//! test timeout plus a grace period) has passed. Grandchildren spawned by the test are not
//! tracked.

use super::imp::run_test_sequence;
use crate::{
    context::{ContextFlags, TestContext},
    helpers::join_messages,
    registry::{Group, TestCase},
    reporter::events::{FailureKind, Outcome},
};
use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, kill},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{ForkResult, Pid, fork, pipe},
};
use std::{
    fs::File,
    io::{self, Read, Write},
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

/// Exit code of a child whose test passed.
pub(crate) const EXIT_PASSED: i32 = 0;

/// Exit code of a child whose test failed.
pub(crate) const EXIT_FAILED: i32 = 1;

/// Exit code of a child whose test was skipped.
pub(crate) const EXIT_SKIPPED: i32 = 2;

/// Timing and output settings for isolated tests.
#[derive(Clone, Debug)]
pub(crate) struct ProcessSettings {
    pub(crate) grace_period: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) echo_output: bool,
}

/// The outcome of an isolated test, along with the pid of the reaped child.
#[derive(Clone, Debug)]
pub(crate) struct IsolatedOutcome {
    pub(crate) outcome: Outcome,
    pub(crate) pid: Option<u32>,
}

/// Runs one test in a forked child and waits for it, up to `timeout` plus the grace period.
pub(crate) fn run_isolated(
    group: &Group,
    test: &TestCase,
    flags: ContextFlags,
    timeout: Duration,
    settings: &ProcessSettings,
) -> IsolatedOutcome {
    let (read_end, write_end) = match pipe() {
        Ok(fds) => fds,
        Err(error) => return internal_failure(test, format!("failed to create pipe: {error}")),
    };

    // Anything still buffered would otherwise be written twice, once by each process.
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    // SAFETY: the child only runs the test sequence and then leaves through _exit.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(read_end);
            run_child(group, test, flags, write_end)
        }
        Ok(ForkResult::Parent { child }) => {
            drop(write_end);
            debug!(
                group = group.name(),
                test = test.name(),
                pid = child.as_raw(),
                "started isolated child"
            );
            supervise(child, read_end, test, timeout, settings)
        }
        Err(error) => internal_failure(test, format!("failed to fork: {error}")),
    }
}

fn run_child(group: &Group, test: &TestCase, flags: ContextFlags, write_end: OwnedFd) -> ! {
    let code = match redirect_output(&write_end) {
        Ok(()) => {
            drop(write_end);
            let cx = TestContext::new(group.name(), Some(test.name()), flags, true);
            let outcome = run_test_sequence(group, test, &cx, None);

            let mut stdout = io::stdout().lock();
            if let Some(message) = outcome.message() {
                let _ = writeln!(stdout, "{message}");
            }
            let _ = stdout.flush();

            match outcome {
                Outcome::Passed { .. } => EXIT_PASSED,
                Outcome::Failed { .. } => EXIT_FAILED,
                Outcome::Skipped { .. } => EXIT_SKIPPED,
            }
        }
        // Nothing can be reported without the pipe; an unusual code makes this visible.
        Err(_) => 101,
    };

    // SAFETY: _exit ends the child without running the parent's atexit handlers or unwinding
    // into the caller's stack.
    unsafe { libc::_exit(code) }
}

fn redirect_output(write_end: &OwnedFd) -> io::Result<()> {
    for target in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(write_end.as_raw_fd(), target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn supervise(
    child: Pid,
    read_end: OwnedFd,
    test: &TestCase,
    timeout: Duration,
    settings: &ProcessSettings,
) -> IsolatedOutcome {
    let pid = Some(child.as_raw() as u32);
    let mut output = ChildOutput::new(read_end, settings.echo_output);
    let deadline = Instant::now() + timeout + settings.grace_period;

    let status = loop {
        output.drain();

        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                break Ok(status);
            }
            // Stopped, continued and ptrace events: the child is still around.
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(error) => {
                // Don't leave the child behind if it can't be waited on.
                let _ = kill(child, Signal::SIGKILL);
                break Err(WaitFailure::Wait(error));
            }
        }

        if Instant::now() >= deadline {
            debug!(pid = child.as_raw(), "deadline passed, killing isolated child");
            let _ = kill(child, Signal::SIGKILL);
            break status_after_kill(reap(child));
        }

        thread::sleep(settings.poll_interval);
    };

    // Whatever the child wrote right before exiting.
    output.drain();
    let captured = output.into_string();

    IsolatedOutcome {
        outcome: classify(test, status, captured, timeout),
        pid,
    }
}

/// Interprets the status of a child reaped after it was sent `SIGKILL` at its deadline.
///
/// The child may have exited on its own between the last poll and the kill.
fn status_after_kill(reaped: Result<WaitStatus, Errno>) -> Result<WaitStatus, WaitFailure> {
    match reaped {
        Ok(WaitStatus::Signaled(_, Signal::SIGKILL, _)) => Err(WaitFailure::TimedOut),
        Ok(status) => Ok(status),
        Err(error) => Err(WaitFailure::Wait(error)),
    }
}

fn classify(
    test: &TestCase,
    status: Result<WaitStatus, WaitFailure>,
    captured: String,
    timeout: Duration,
) -> Outcome {
    match status {
        Ok(WaitStatus::Exited(_, EXIT_PASSED)) => Outcome::Passed {
            message: (!captured.is_empty()).then_some(captured),
        },
        Ok(WaitStatus::Exited(_, EXIT_SKIPPED)) => Outcome::skipped(captured),
        Ok(WaitStatus::Exited(_, EXIT_FAILED)) => {
            let message = if captured.is_empty() {
                format!("process exited with code {EXIT_FAILED}")
            } else {
                captured
            };
            Outcome::failed(FailureKind::Exit, message)
        }
        // The body left through process::exit, so the child never applied expected failure.
        Ok(WaitStatus::Exited(_, code)) => {
            let summary = format!("process exited with code {code}");
            synthesized(
                test,
                Outcome::failed(FailureKind::Exit, join_messages([&*captured, &*summary])),
            )
        }
        Ok(WaitStatus::Signaled(_, signal, core_dumped)) => {
            let mut summary = format!("terminated by signal {}", display_signal(signal));
            if core_dumped {
                summary.push_str(" (core dumped)");
            }
            synthesized(
                test,
                Outcome::failed(FailureKind::Signal, join_messages([&*summary, &*captured])),
            )
        }
        Ok(other) => synthesized(
            test,
            Outcome::failed(
                FailureKind::Internal,
                format!("unexpected wait status: {other:?}"),
            ),
        ),
        Err(WaitFailure::TimedOut) => {
            let summary = format!("Timeout: process exceeded {} ms", timeout.as_millis());
            synthesized(
                test,
                Outcome::failed(FailureKind::Timeout, join_messages([&*summary, &*captured])),
            )
        }
        Err(WaitFailure::Wait(error)) => synthesized(
            test,
            Outcome::failed(
                FailureKind::Internal,
                format!("failed to wait for child process: {error}"),
            ),
        ),
    }
}

/// Formats a signal as `SIGSEGV (11)`.
fn display_signal(signal: Signal) -> String {
    format!("{} ({})", signal.as_str(), signal as i32)
}

#[derive(Debug)]
enum WaitFailure {
    TimedOut,
    Wait(Errno),
}

/// Blocks until the child has been reaped.
fn reap(child: Pid) -> Result<WaitStatus, Errno> {
    loop {
        match waitpid(child, None) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// Outcomes the child never got to report itself still honor the registration-time declaration.
fn synthesized(test: &TestCase, outcome: Outcome) -> Outcome {
    if test.expects_failure() {
        outcome.invert_expected_failure()
    } else {
        outcome
    }
}

fn internal_failure(test: &TestCase, message: String) -> IsolatedOutcome {
    IsolatedOutcome {
        outcome: synthesized(test, Outcome::failed(FailureKind::Internal, message)),
        pid: None,
    }
}

/// The read end of the child's output pipe.
struct ChildOutput {
    file: Option<File>,
    captured: Vec<u8>,
    echo: bool,
}

impl ChildOutput {
    fn new(read_end: OwnedFd, echo: bool) -> Self {
        let file = match set_nonblocking(read_end.as_raw_fd()) {
            Ok(()) => Some(File::from(read_end)),
            Err(error) => {
                // A blocking read could hang the scheduler, so give up on capture instead.
                debug!(%error, "failed to make child output non-blocking, discarding it");
                None
            }
        };
        Self {
            file,
            captured: Vec::new(),
            echo,
        }
    }

    /// Reads everything available right now.
    fn drain(&mut self) {
        let Some(file) = &mut self.file else {
            return;
        };
        let mut buf = [0_u8; 4096];
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    // End of file: every writer is gone.
                    self.file = None;
                    return;
                }
                Ok(n) => {
                    self.captured.extend_from_slice(&buf[..n]);
                    if self.echo {
                        let _ = io::stdout().write_all(&buf[..n]);
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) => {
                    debug!(%error, "error reading child output");
                    self.file = None;
                    return;
                }
            }
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.captured).trim_end().to_owned()
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a valid descriptor with integer arguments.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Redirects stdout and stderr to `/dev/null` until dropped.
///
/// Used by silent mode. Output already buffered is flushed first so it still appears.
#[derive(Debug)]
pub struct SilenceGuard {
    saved_stdout: OwnedFd,
    saved_stderr: OwnedFd,
}

impl SilenceGuard {
    /// Starts redirecting stdout and stderr to `/dev/null`.
    pub fn new() -> io::Result<Self> {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        let saved_stdout = dup(libc::STDOUT_FILENO)?;
        let saved_stderr = dup(libc::STDERR_FILENO)?;
        let dev_null = File::options().write(true).open("/dev/null")?;
        for target in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            // SAFETY: both descriptors are valid for the duration of the call.
            if unsafe { libc::dup2(dev_null.as_raw_fd(), target) } == -1 {
                let error = io::Error::last_os_error();
                // Put back whatever was already redirected.
                restore(&saved_stdout, &saved_stderr);
                return Err(error);
            }
        }

        Ok(Self {
            saved_stdout,
            saved_stderr,
        })
    }
}

impl Drop for SilenceGuard {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        restore(&self.saved_stdout, &self.saved_stderr);
    }
}

fn dup(fd: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: dup on a standard descriptor returns a fresh descriptor owned by us, or -1.
    let new = unsafe { libc::dup(fd) };
    if new == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: new is a valid, open descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(new) })
}

fn restore(saved_stdout: &OwnedFd, saved_stderr: &OwnedFd) {
    for (saved, target) in [
        (saved_stdout, libc::STDOUT_FILENO),
        (saved_stderr, libc::STDERR_FILENO),
    ] {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(saved.as_raw_fd(), target) } == -1 {
            debug!(
                error = %io::Error::last_os_error(),
                target,
                "failed to restore output descriptor"
            );
        }
    }
}
