use thiserror::Error;

use crate::store::ProjectId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no usable credential for user '{user}'")]
    Credential { user: String },

    #[error("remote {op} failed: {msg}")]
    Remote { op: &'static str, msg: String },

    #[error("archive error for '{project}': {msg}")]
    Archive { project: String, msg: String },

    #[error("import of '{name}' failed: {msg}")]
    Import { name: String, msg: String },

    #[error("project {0} not found in local store")]
    NotFound(ProjectId),

    #[error("{0}")]
    Config(String),

    #[error("project store: {0}")]
    Store(String),

    #[error("backup service {0}")]
    Service(&'static str),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::Config(msg.into())
    }

    pub fn store<M: Into<String>>(msg: M) -> Self {
        Self::Store(msg.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn remote<M: Into<String>>(op: &'static str, msg: M) -> Self {
        Self::Remote {
            op,
            msg: msg.into(),
        }
    }

    pub fn archive(project: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Archive {
            project: project.into(),
            msg: msg.into(),
        }
    }

    pub fn import(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Import {
            name: name.into(),
            msg: msg.into(),
        }
    }

    // Remote failures leave the remote namespace in an unknown state; callers must not read
    // them as "absent".
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io("i/o error", err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::remote("request", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn remote_errors_are_distinguishable() {
        let e = Error::remote("list", "503 Service Unavailable");
        assert!(e.is_remote());
        assert_eq!(e.to_string(), "remote list failed: 503 Service Unavailable");
        assert!(!Error::NotFound(crate::store::ProjectId(7)).is_remote());
    }

    #[test]
    fn io_errors_keep_their_source() {
        use std::error::Error as _;

        let e = Error::io(
            "read /tmp/x",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(&e, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied));
        assert!(e.source().is_some());
        assert!(!e.is_remote());
    }
}
