// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::HashMap;
use std::path::Path;

use super::Authenticator;
use crate::error::{Error, ErrorKind};

/// Password-file authenticator.
///
/// One `username:password` pair per line; empty lines and `#` comments are
/// skipped. Anonymous connections are refused.
#[derive(Debug, Default)]
pub struct FileAuth {
    users: HashMap<String, String>,
}

impl FileAuth {
    /// Load a password file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a line is malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(&path).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!(
                    "auth: failed to read password file {:?}: {err}",
                    path.as_ref()
                ),
            )
        })?;
        Self::parse(&content)
    }

    /// Parse password-file content.
    ///
    /// # Errors
    ///
    /// Returns error if a line has no `:` separator.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let mut users = HashMap::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((username, password)) = line.split_once(':') else {
                return Err(Error::from_string(
                    ErrorKind::ConfigError,
                    format!("auth: invalid password file line {}", line_no + 1),
                ));
            };
            users.insert(username.to_string(), password.to_string());
        }
        Ok(Self { users })
    }
}

impl Authenticator for FileAuth {
    fn authenticate(&self, username: &str, password: &[u8]) -> Option<String> {
        let expected = self.users.get(username)?;
        if expected.as_bytes() == password {
            Some(username.to_string())
        } else {
            None
        }
    }

    fn authenticate_anonymous(&self) -> Option<String> {
        None
    }

    fn authorize_publish(&self, _topic: &str, _username: &str) -> bool {
        true
    }

    fn authorize_subscribe(&self, _filter: &str, _username: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_authenticate() {
        let auth = FileAuth::parse("# users\nalice:secret\nbob:hunter2\n").unwrap();
        assert_eq!(auth.authenticate("alice", b"secret"), Some("alice".into()));
        assert_eq!(auth.authenticate("alice", b"wrong"), None);
        assert_eq!(auth.authenticate("carol", b"secret"), None);
        assert_eq!(auth.authenticate_anonymous(), None);
    }

    #[test]
    fn test_malformed_line() {
        assert!(FileAuth::parse("no-separator\n").is_err());
    }
}
