//! # Worker Spawning
//!
//! A [`Spawn`] implementation starts a worker and hands back the host's end of
//! the channel to it. [`WorkerOptions`] carries the small set of named options
//! a worker is created with; every option is optional, and unset means the
//! spawner's default.

use std::fmt;

use crate::transport;
use crate::transport::Transport;

/// Environment variable carrying the worker's name to a child process.
pub const ENV_WORKER_NAME: &str = "WORKERLINK_WORKER_NAME";
/// Environment variable carrying the worker type to a child process.
pub const ENV_WORKER_TYPE: &str = "WORKERLINK_WORKER_TYPE";
/// Environment variable carrying the credential policy to a child process.
pub const ENV_CREDENTIALS: &str = "WORKERLINK_CREDENTIALS";

/// How the worker's code is executed. The default is `Classic`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum WorkerType {
    #[default]
    Classic,
    Module,
}

impl WorkerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classic" => Some(Self::Classic),
            "module" => Some(Self::Module),
            _ => None,
        }
    }
}

/// Which credentials the worker may use. The default is `Omit`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    Omit,
    SameOrigin,
    Include,
}

impl Credentials {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Omit => "omit",
            Self::SameOrigin => "same-origin",
            Self::Include => "include",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "omit" => Some(Self::Omit),
            "same-origin" => Some(Self::SameOrigin),
            "include" => Some(Self::Include),
            _ => None,
        }
    }
}

/// Named options for a new worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    pub worker_type: Option<WorkerType>,
    pub credentials: Option<Credentials>,
    /// An identifying name, used for debugging and logging.
    pub name: Option<String>,
}

impl WorkerOptions {
    /// Options with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }

    pub fn worker_type(mut self, worker_type: WorkerType) -> Self {
        self.worker_type = Some(worker_type);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// The name used in logs; empty when unset.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Key/value pairs for the options that are set, keyed by the
    /// `WORKERLINK_*` environment variable names.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        let mut env = Vec::with_capacity(3);
        if let Some(t) = self.worker_type {
            env.push((ENV_WORKER_TYPE, t.as_str().to_owned()));
        }
        if let Some(c) = self.credentials {
            env.push((ENV_CREDENTIALS, c.as_str().to_owned()));
        }
        if let Some(name) = self.name.as_ref().filter(|n| !n.is_empty()) {
            env.push((ENV_WORKER_NAME, name.clone()));
        }
        env
    }

    /// Rebuilds options from a variable lookup. Empty or unrecognised values
    /// are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            worker_type: get(ENV_WORKER_TYPE).and_then(|v| WorkerType::parse(&v)),
            credentials: get(ENV_CREDENTIALS).and_then(|v| Credentials::parse(&v)),
            name: get(ENV_WORKER_NAME),
        }
    }

    /// Reads the options a parent process passed through the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl fmt::Display for WorkerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (type: {}, credentials: {})",
            self.display_name(),
            self.worker_type.unwrap_or_default().as_str(),
            self.credentials.unwrap_or_default().as_str()
        )
    }
}

/// Starts workers.
pub trait Spawn: Send + Sync {
    /// Starts a worker and returns the host's end of its channel.
    ///
    /// Called from within a tokio runtime.
    fn spawn(&self, options: &WorkerOptions) -> transport::Result<Box<dyn Transport>>;
}
