use std::env;
use std::fmt;

use crate::error::{Result, RotatorError};

pub const ACCESS_KEY_ID_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";

/// AWS access key pair used to sign control-plane requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Resolve credentials from explicit values first, then the environment.
    ///
    /// Each half of the pair falls back independently, so an explicit key id
    /// can be combined with a secret from `AWS_SECRET_ACCESS_KEY`.
    pub fn resolve(access_key_id: Option<&str>, secret_access_key: Option<&str>) -> Result<Self> {
        let access_key_id = pick(access_key_id, ACCESS_KEY_ID_VAR);
        let secret_access_key = pick(secret_access_key, SECRET_ACCESS_KEY_VAR);

        match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(Self {
                access_key_id,
                secret_access_key,
                session_token: pick(None, SESSION_TOKEN_VAR),
            }),
            _ => Err(RotatorError::MissingCredentials),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn pick(explicit: Option<&str>, var: &str) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| {
            env::var(var)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch process environment variables
    pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        pub(crate) fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    const KEYS: &[&str] = &[ACCESS_KEY_ID_VAR, SECRET_ACCESS_KEY_VAR, SESSION_TOKEN_VAR];

    #[test]
    fn test_explicit_credentials_win() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::new(KEYS);
        env::set_var(ACCESS_KEY_ID_VAR, "ENVKEY");
        env::set_var(SECRET_ACCESS_KEY_VAR, "envsecret");

        let creds = Credentials::resolve(Some("AKIDEXAMPLE"), Some("secret")).unwrap();
        assert_eq!(creds.access_key_id, "AKIDEXAMPLE");
        assert_eq!(creds.secret_access_key, "secret");
    }

    #[test]
    fn test_env_fallback() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::new(KEYS);
        env::set_var(ACCESS_KEY_ID_VAR, "ENVKEY");
        env::set_var(SECRET_ACCESS_KEY_VAR, "envsecret");
        env::set_var(SESSION_TOKEN_VAR, "token");

        let creds = Credentials::resolve(None, Some("  ")).unwrap();
        assert_eq!(creds.access_key_id, "ENVKEY");
        assert_eq!(creds.secret_access_key, "envsecret");
        assert_eq!(creds.session_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_missing_credentials() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::new(KEYS);

        let err = Credentials::resolve(Some("AKIDEXAMPLE"), None).unwrap_err();
        assert!(matches!(err, RotatorError::MissingCredentials));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("AKIDEXAMPLE", "super-secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("AKIDEXAMPLE"));
        assert!(!debug.contains("super-secret"));
    }
}
