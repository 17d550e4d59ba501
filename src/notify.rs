//! Operator notifications. Delivery is best-effort: failures are logged and
//! never reach the fetch path.

use std::process::{Command, Stdio};
use std::thread;

use log::{info, warn};

use crate::fetch::Notifier;

/// Writes notifications to the log only.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!("[{title}] {message}");
    }
}

/// Runs an external program with `title` and `message` as its last two
/// arguments, e.g. a desktop notification helper.
#[derive(Clone, Debug)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a whitespace separated command line into program and arguments.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_owned);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl Notifier for CommandNotifier {
    /// Starts the program and returns at once. The child is reaped on a
    /// detached thread, so a hung helper never holds up the caller.
    fn notify(&self, title: &str, message: &str) {
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(title)
            .arg(message)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => {
                warn!("Notifier {} failed to start: {error}", self.program);
                return;
            }
        };

        let program = self.program.clone();
        thread::spawn(move || match child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("Notifier {program} exited with {status}"),
            Err(error) => warn!("Notifier {program} could not be waited on: {error}"),
        });
    }
}

/// Either of the available notifiers, picked at runtime.
#[derive(Clone, Debug)]
pub enum OperatorNotifier {
    Log(LogNotifier),
    Command(CommandNotifier),
}

impl Notifier for OperatorNotifier {
    fn notify(&self, title: &str, message: &str) {
        match self {
            OperatorNotifier::Log(notifier) => notifier.notify(title, message),
            OperatorNotifier::Command(notifier) => {
                LogNotifier.notify(title, message);
                notifier.notify(title, message);
            }
        }
    }
}
