use std::sync::mpsc::RecvError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GustoError {
    #[error("Configuration error:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Task graph error:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while cleaning the dist directory:\n{0}")]
    Clean(#[from] CleanError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Error while publishing:\n{0}")]
    Publish(#[from] PublishError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(String, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(String, toml::de::Error),
}

/// Errors raised by the task graph runner. Every variant except [`GraphError::Task`]
/// is a configuration error detected before any action executes.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{0}' is registered twice")]
    DuplicateTask(String),

    #[error("Dependency cycle through task '{0}'")]
    Cycle(String),

    #[error("Task '{name}':\n{source}")]
    Task {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("Couldn't remove '{0}'.\n{1}")]
    Remove(String, std::io::Error),

    #[error("Couldn't create '{0}'.\n{1}")]
    Create(String, std::io::Error),
}

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("Couldn't read or write an asset.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Asset '{0}' is outside the dist directory")]
    OutsideDist(String),

    #[error("Couldn't serialize the manifest.\n{0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error(transparent)]
    Recv(#[from] RecvError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("No bucket configured; set [publish] bucket in gusto.toml")]
    MissingBucket,

    #[error("Couldn't read '{0}'.\n{1}")]
    FileSystem(String, std::io::Error),

    #[error("Failed to build runtime.\n{0}")]
    Runtime(std::io::Error),

    #[error("Couldn't compress '{0}'.\n{1}")]
    Compress(String, std::io::Error),

    #[error("Upload of '{key}' failed.\n{source}")]
    Upload {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}
