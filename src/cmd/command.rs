use std::io::{BufRead, BufReader, Error, ErrorKind, Lines, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::cmd::command::CommandError::{ExecutionError, ExitStatusError, Killed, TimeoutError};

use itertools::Itertools;
use timeout_readwrite::TimeoutReader;

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("Error while executing command: {0}")]
    ExecutionError(#[from] Error),

    #[error("Command terminated with a non success exit status code: {0}")]
    ExitStatusError(ExitStatus),

    #[error("Command killed due to timeout: {0}")]
    TimeoutError(String),

    #[error("Command killed by user request: {0}")]
    Killed(String),
}

#[derive(Debug, Clone)]
pub enum AbortReason {
    Timeout(Duration),
    Canceled(String),
}

/// Tells a running command when it has to be killed.
pub struct CommandKiller<'a> {
    should_abort: Box<dyn Fn() -> Option<AbortReason> + 'a>,
}

impl<'a> CommandKiller<'a> {
    pub fn never() -> CommandKiller<'a> {
        CommandKiller {
            should_abort: Box::new(|| None),
        }
    }

    pub fn from_timeout(timeout: Duration) -> CommandKiller<'a> {
        let started_at = Instant::now();
        CommandKiller {
            should_abort: Box::new(move || {
                if started_at.elapsed() >= timeout {
                    return Some(AbortReason::Timeout(timeout));
                }

                None
            }),
        }
    }

    pub fn from_cancelable(is_canceled: &'a dyn Fn() -> bool) -> CommandKiller<'a> {
        CommandKiller {
            should_abort: Box::new(move || {
                if is_canceled() {
                    return Some(AbortReason::Canceled("Scenario canceled".to_string()));
                }
                None
            }),
        }
    }

    pub fn from(timeout: Duration, is_canceled: &'a dyn Fn() -> bool) -> CommandKiller<'a> {
        let has_timeout = Self::from_timeout(timeout);
        let is_canceled = Self::from_cancelable(is_canceled);
        CommandKiller {
            should_abort: Box::new(move || has_timeout.should_abort().or_else(|| is_canceled.should_abort())),
        }
    }

    pub fn should_abort(&self) -> Option<AbortReason> {
        (self.should_abort)()
    }
}

/// A child process whose output is streamed line by line to the caller.
pub struct HarnessCommand {
    command: Command,
    printable: String,
}

impl HarnessCommand {
    /// Values of `secret_envs` never show up in logs nor in errors.
    pub fn new<P, S>(binary: P, args: &[S], envs: &[(String, String)], secret_envs: &[&str]) -> HarnessCommand
    where
        P: AsRef<Path>,
        S: AsRef<str>,
    {
        let mut command = Command::new(binary.as_ref().as_os_str());
        command.args(args.iter().map(|a| a.as_ref()));
        command.envs(envs.iter().map(|(k, v)| (k, v)));

        HarnessCommand {
            command,
            printable: command_to_string(binary, args, envs, secret_envs),
        }
    }

    pub fn set_current_dir<P: AsRef<Path>>(&mut self, root_dir: P) {
        self.command.current_dir(root_dir);
    }

    fn kill(cmd_handle: &mut Child) {
        let _ = cmd_handle
            .kill()
            .map(|_| cmd_handle.wait())
            .map_err(|err| error!("Cannot kill process {}: {}", cmd_handle.id(), err));
    }

    pub fn exec_with_abort<STDOUT, STDERR>(
        &mut self,
        stdout_output: &mut STDOUT,
        stderr_output: &mut STDERR,
        abort_notifier: &CommandKiller,
    ) -> Result<(), CommandError>
    where
        STDOUT: FnMut(String),
        STDERR: FnMut(String),
    {
        debug!("command: {}", self.printable);
        let mut cmd_handle = self
            .command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ExecutionError)?;

        let stdout = cmd_handle
            .stdout
            .take()
            .ok_or_else(|| ExecutionError(Error::new(ErrorKind::BrokenPipe, "Cannot get stdout for command")))?;
        let mut stdout_reader = BufReader::new(TimeoutReader::new(stdout, Duration::from_secs(1))).lines();

        let stderr = cmd_handle
            .stderr
            .take()
            .ok_or_else(|| ExecutionError(Error::new(ErrorKind::BrokenPipe, "Cannot get stderr for command")))?;
        // don't block on stderr
        let mut stderr_reader = BufReader::new(TimeoutReader::new(stderr, Duration::from_secs(0))).lines();

        let mut stdout_closed = false;
        let mut stderr_closed = false;
        while !stdout_closed || !stderr_closed {
            if abort_notifier.should_abort().is_some() {
                break;
            }

            stdout_closed = stdout_closed || self.drain(&mut stdout_reader, stdout_output, abort_notifier);
            stderr_closed = stderr_closed || self.drain(&mut stderr_reader, stderr_output, abort_notifier);
        }

        // Wait for the process to exit, kill it if the abort notifier says so
        let exit_status = loop {
            match cmd_handle.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => match abort_notifier.should_abort() {
                    None => {}
                    Some(AbortReason::Timeout(timeout)) => {
                        let msg = format!(
                            "Killing process {} due to timeout {}s reached",
                            self.printable,
                            timeout.as_secs()
                        );
                        warn!("{}", msg);
                        Self::kill(&mut cmd_handle);
                        return Err(TimeoutError(msg));
                    }
                    Some(AbortReason::Canceled(_)) => {
                        let msg = format!("Killing process {}", self.printable);
                        warn!("{}", msg);
                        Self::kill(&mut cmd_handle);
                        return Err(Killed(msg));
                    }
                },
                Err(err) => return Err(ExecutionError(err)),
            };

            std::thread::sleep(Duration::from_millis(500));
        };

        if !exit_status.success() {
            debug!("command: {} terminated with error exit status {:?}", self.printable, exit_status);
            return Err(ExitStatusError(exit_status));
        }

        Ok(())
    }

    /// Forwards every line available right now. Returns true once the stream is closed.
    fn drain<R, SINK>(&self, reader: &mut Lines<BufReader<R>>, sink: &mut SINK, abort_notifier: &CommandKiller) -> bool
    where
        R: Read,
        SINK: FnMut(String),
    {
        loop {
            match reader.next() {
                None => return true,
                Some(Err(ref err)) if err.kind() == ErrorKind::TimedOut => return false,
                Some(Ok(line)) => sink(line),
                Some(Err(err)) => {
                    error!("Error while reading output of cmd {}: {:?}", self.printable, err);
                    return true;
                }
            }

            if abort_notifier.should_abort().is_some() {
                return true;
            }
        }
    }
}

/// Printable form of a command line, values of `secret_envs` are masked.
pub fn command_to_string<P, S>(binary: P, args: &[S], envs: &[(String, String)], secret_envs: &[&str]) -> String
where
    P: AsRef<Path>,
    S: AsRef<str>,
{
    let envs = envs
        .iter()
        .map(|(k, v)| match secret_envs.contains(&k.as_str()) {
            true => format!("{k}=***"),
            false => format!("{k}={v}"),
        })
        .join(" ");
    format!(
        "{} {:?} {}",
        envs,
        binary.as_ref().as_os_str(),
        args.iter().map(|a| a.as_ref()).join(" ")
    )
}
