//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::runner::{CommandOutput, CommandRunner, RunnerFuture};
use crate::transport::{CommandResult, ExecFuture, RemoteExecutor, TransportError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic `ssh`/`scp` outcomes without spawning
/// processes. Clones share the same queue and invocation log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<StdMutex<VecDeque<CommandOutput>>>,
    invocations: Arc<StdMutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Box::pin(async move {
            next.ok_or_else(|| TransportError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

/// Scripted remote executor for exercising compose, health and inspection
/// logic without a session.
///
/// Responses are served in FIFO order; once only one remains it is repeated
/// for every further call, which models a remote state that stopped
/// changing.
#[derive(Clone, Debug, Default)]
pub struct ScriptedExecutor {
    responses: Arc<StdMutex<VecDeque<Result<CommandResult, TransportError>>>>,
    commands: Arc<StdMutex<Vec<String>>>,
}

impl ScriptedExecutor {
    /// Creates an executor with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful command with the given stdout.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_result(0, stdout);
    }

    /// Queues a command result with an explicit exit code.
    pub fn push_result(&self, exit_code: i32, stdout: impl Into<String>) {
        self.push(Ok(CommandResult {
            exit_code,
            stdout: stdout.into(),
            stderr: String::new(),
        }));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: TransportError) {
        self.push(Err(error));
    }

    fn push(&self, response: Result<CommandResult, TransportError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// Returns every command executed so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RemoteExecutor for ScriptedExecutor {
    fn execute<'a>(&'a self, command: &'a str, _cancel: &'a CancellationToken) -> ExecFuture<'a> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_owned());
        let next = {
            let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
            if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
        };
        Box::pin(async move {
            next.unwrap_or_else(|| {
                Err(TransportError::Spawn {
                    program: String::from("ssh"),
                    message: String::from("no scripted response available"),
                })
            })
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes variables for the lifetime of the guard.
    pub async fn remove_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
