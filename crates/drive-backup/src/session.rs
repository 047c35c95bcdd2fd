use crate::config::DriveConfig;
use crate::credentials::{Credential, CredentialProvider};
use crate::error::{Error, Result};
use crate::remote::{DriveClient, RemoteStore};

/// Per-user context for remote work: the local user id plus a remote store authorized for that
/// user. Sessions are built explicitly and never shared between users.
pub struct Session {
    user: String,
    remote: Box<dyn RemoteStore>,
}

impl Session {
    pub fn open<F>(user: &str, creds: &dyn CredentialProvider, connect: F) -> Result<Self>
    where
        F: FnOnce(Credential) -> Result<Box<dyn RemoteStore>>,
    {
        let Some(credential) = creds.credential(user) else {
            return Err(Error::Credential {
                user: user.to_string(),
            });
        };
        Ok(Self {
            user: user.to_string(),
            remote: connect(credential)?,
        })
    }

    pub fn drive(user: &str, creds: &dyn CredentialProvider, cfg: &DriveConfig) -> Result<Self> {
        Self::open(user, creds, |credential| {
            Ok(Box::new(DriveClient::new(cfg, credential)?) as Box<dyn RemoteStore>)
        })
    }

    pub fn with_remote(user: &str, remote: impl RemoteStore + 'static) -> Self {
        Self {
            user: user.to_string(),
            remote: Box::new(remote),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn remote(&self) -> &dyn RemoteStore {
        self.remote.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::remote::MemoryRemote;

    #[test]
    fn missing_credential_blocks_the_session() {
        let creds = StaticCredentials::new().with_token("alice", "tok");
        let mut connected = false;
        let err = Session::open("bob", &creds, |_| {
            connected = true;
            Ok(Box::new(MemoryRemote::new()) as Box<dyn RemoteStore>)
        })
        .err()
        .expect("no credential");
        assert!(matches!(err, Error::Credential { ref user } if user == "bob"));
        assert!(!connected);

        let s = Session::open("alice", &creds, |c| {
            assert_eq!(c.access_token(), "tok");
            Ok(Box::new(MemoryRemote::new()) as Box<dyn RemoteStore>)
        })
        .expect("session");
        assert_eq!(s.user(), "alice");
    }
}
