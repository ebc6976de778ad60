//! What a channel observes: a process it spawns, an existing pid, or the host.

use super::ChannelError;
use crate::source::TargetInfo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// How to launch a target process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Replaces the inherited environment when set.
    #[serde(default)]
    pub env: Option<Vec<(String, String)>>,
    /// Defaults to the system temp directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Target {
    /// Host-wide sampling with no process.
    #[default]
    None,
    Spawn(SpawnSpec),
    Attach(u32),
}

/// Parameters for a new channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSpec {
    pub target: Target,
    /// Kill a spawned target when the channel is stopped by shutdown.
    pub kill_on_stop: bool,
}

impl ChannelSpec {
    pub fn host() -> Self {
        Self::default()
    }

    pub fn spawn(program: impl Into<String>) -> Self {
        Self {
            target: Target::Spawn(SpawnSpec {
                program: program.into(),
                args: Vec::new(),
                env: None,
                working_dir: None,
            }),
            kill_on_stop: true,
        }
    }

    pub fn attach(pid: u32) -> Self {
        Self {
            target: Target::Attach(pid),
            kill_on_stop: false,
        }
    }

    /// Append arguments. No effect unless the target is spawned.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Target::Spawn(spawn) = &mut self.target {
            spawn.args.extend(args.into_iter().map(Into::into));
        }
        self
    }

    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        if let Target::Spawn(spawn) = &mut self.target {
            spawn.env = Some(env);
        }
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if let Target::Spawn(spawn) = &mut self.target {
            spawn.working_dir = Some(dir.into());
        }
        self
    }

    pub fn kill_on_stop(mut self, kill: bool) -> Self {
        self.kill_on_stop = kill;
        self
    }
}

/// Start or validate the target. Returns what sources should see and the
/// child handle when one was spawned.
pub(super) fn launch(target: &Target, proc_root: &Path) -> Result<(TargetInfo, Option<Child>), ChannelError> {
    match target {
        Target::None => Ok((TargetInfo::default(), None)),
        Target::Attach(pid) => {
            if !proc_root.join(pid.to_string()).is_dir() {
                return Err(ChannelError::TargetNotFound { pid: *pid });
            }
            Ok((
                TargetInfo {
                    pid: Some(*pid),
                    spawned: false,
                },
                None,
            ))
        }
        Target::Spawn(spawn) => {
            let mut command = Command::new(&spawn.program);
            command
                .args(&spawn.args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .current_dir(spawn.working_dir.clone().unwrap_or_else(std::env::temp_dir));
            if let Some(env) = &spawn.env {
                command.env_clear().envs(env.iter().map(|(k, v)| (k, v)));
            }

            let child = command.spawn().map_err(|source| ChannelError::Spawn {
                program: spawn.program.clone(),
                source,
            })?;
            tracing::info!("Spawned {} (pid {})", spawn.program, child.id());
            Ok((
                TargetInfo {
                    pid: Some(child.id()),
                    spawned: true,
                },
                Some(child),
            ))
        }
    }
}
