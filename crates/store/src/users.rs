//! The user pool backing HTTP Basic authentication. Users live in a JSON
//! file mapping each name to the lowercase hex SHA-256 digest of its
//! password; the file is read once at startup.

use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::Service;

pub struct UserPool {
    path: PathBuf,
    users: BTreeMap<String, String>,
}

impl UserPool {
    pub fn new(path: impl Into<PathBuf>) -> UserPool {
        UserPool {
            path: path.into(),
            users: BTreeMap::new(),
        }
    }

    pub fn access_permitted(&self, user: &str, password: &str) -> bool {
        let digest = hex::encode(Sha256::digest(password.as_bytes()));
        self.users.get(user).map_or(false, |stored| *stored == digest)
    }
}

impl Service for UserPool {
    fn initialize(&mut self) -> anyhow::Result<()> {
        let raw = fs::read_to_string(&self.path)?;
        self.users = serde_json::from_str(&raw)?;
        tracing::info!(path = %self.path.display(), users = self.users.len(), "loaded user pool");
        Ok(())
    }

    fn tick(&mut self) {}

    fn shutdown(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_only_matching_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");

        // sha256("secret")
        std::fs::write(
            &path,
            r#"{"admin":"2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"}"#,
        )
        .unwrap();

        let mut pool = UserPool::new(&path);
        pool.initialize().unwrap();

        assert!(pool.access_permitted("admin", "secret"));
        assert!(!pool.access_permitted("admin", "wrong"));
        assert!(!pool.access_permitted("nobody", "secret"));
    }

    #[test]
    fn initialize_fails_without_a_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = UserPool::new(dir.path().join("absent.json"));
        assert!(pool.initialize().is_err());
    }
}
