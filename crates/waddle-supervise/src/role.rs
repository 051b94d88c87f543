//! Supervisor-or-child role resolution.
//!
//! The spawner sets the environment key only in the child's environment,
//! never its own, so presence of the key is the whole role signal.

use crate::error::SuperviseError;

/// What the current process is for a given environment key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// The key is absent: this is the top-level instance.
    Supervisor,
    /// The key is present: this process was spawned by a supervisor. The
    /// value is opaque to the role check; for the readiness handshake it is
    /// the endpoint address.
    Supervised { value: String },
}

impl Role {
    /// Resolve the role from the process environment.
    ///
    /// This should be called once at startup; the environment is not
    /// consulted again afterwards.
    pub fn from_env(env_key: &str) -> Result<Self, SuperviseError> {
        Self::from_lookup(env_key, |key| {
            std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
        })
    }

    /// Resolve the role using an arbitrary variable lookup.
    ///
    /// An empty value is treated the same as an absent one.
    pub fn from_lookup<F>(env_key: &str, lookup: F) -> Result<Self, SuperviseError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        if env_key.is_empty() {
            return Err(SuperviseError::EmptyEnvKey);
        }
        match lookup(env_key) {
            Some(value) if !value.is_empty() => Ok(Role::Supervised { value }),
            _ => Ok(Role::Supervisor),
        }
    }

    pub fn is_supervised(&self) -> bool {
        matches!(self, Role::Supervised { .. })
    }

    /// The environment value handed down by the spawner, if any.
    pub fn value(&self) -> Option<&str> {
        match self {
            Role::Supervisor => None,
            Role::Supervised { value } => Some(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in<'a>(
        vars: &'a HashMap<&'a str, &'a str>,
    ) -> impl FnOnce(&str) -> Option<String> + 'a {
        move |key| vars.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_missing_key_is_supervisor() {
        let vars = HashMap::from([("PATH", "/usr/bin")]);
        let role = Role::from_lookup("APP_MONITOR", lookup_in(&vars)).unwrap();
        assert_eq!(role, Role::Supervisor);
        assert!(!role.is_supervised());
        assert_eq!(role.value(), None);
    }

    #[test]
    fn test_present_key_is_supervised() {
        let vars = HashMap::from([("APP_MONITOR", "http://127.0.0.1:4100")]);
        let role = Role::from_lookup("APP_MONITOR", lookup_in(&vars)).unwrap();
        assert!(role.is_supervised());
        assert_eq!(role.value(), Some("http://127.0.0.1:4100"));
    }

    #[test]
    fn test_empty_value_counts_as_absent() {
        let vars = HashMap::from([("APP_MONITOR", "")]);
        let role = Role::from_lookup("APP_MONITOR", lookup_in(&vars)).unwrap();
        assert_eq!(role, Role::Supervisor);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let err = Role::from_lookup("", |_| Some("x".to_string())).unwrap_err();
        assert!(matches!(err, SuperviseError::EmptyEnvKey));
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_from_env_without_key() {
        let role = Role::from_env("WADDLE_SUPERVISE_ROLE_TEST_UNSET_KEY").unwrap();
        assert_eq!(role, Role::Supervisor);
    }
}
