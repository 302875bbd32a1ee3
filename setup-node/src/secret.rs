use crate::error::{Result, SetupError};
use std::fmt;
use std::path::Path;

/// Wrapper for bearer tokens and private keys that keeps them out of logs
///
/// `Debug` and `Display` print `[REDACTED]`. There is no serde support, so a
/// secret can not end up in a request or response body by accident; the value
/// is reachable only through [`Secret::expose_secret`].
#[derive(Clone, PartialEq, Eq)]
pub struct Secret<T> {
    inner: T,
}

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    pub fn expose_secret(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl Secret<String> {
    /// Read a secret from an environment variable, rejecting empty values
    pub fn from_env(var_name: &str) -> Result<Self> {
        let value = std::env::var(var_name).map_err(|e| {
            SetupError::Secret(format!("Environment variable '{}' not set: {}", var_name, e))
        })?;
        if value.is_empty() {
            return Err(SetupError::Secret(format!(
                "Environment variable '{}' is empty",
                var_name
            )));
        }
        Ok(Self::new(value))
    }

    /// Read a secret from a file such as a mounted service account token
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let value = std::fs::read_to_string(path).map_err(|e| {
            SetupError::Secret(format!("Can not read '{}': {}", path.display(), e))
        })?;
        let value = value.trim().to_string();
        if value.is_empty() {
            return Err(SetupError::Secret(format!("'{}' is empty", path.display())));
        }
        Ok(Self::new(value))
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Clone> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_secret_debug_and_display() {
        let secret = Secret::new("sha256~bearer-token".to_string());
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_secret_expose() {
        let secret = Secret::new("sha256~bearer-token".to_string());
        assert_eq!(secret.expose_secret(), "sha256~bearer-token");
    }

    #[test]
    fn test_secret_from_env_empty() {
        std::env::set_var("SETUP_TEST_SECRET_EMPTY", "");
        let result = Secret::<String>::from_env("SETUP_TEST_SECRET_EMPTY");
        assert!(matches!(result, Err(SetupError::Secret(msg)) if msg.contains("empty")));
        std::env::remove_var("SETUP_TEST_SECRET_EMPTY");
    }

    #[test]
    fn test_secret_from_file_trims() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service-account-token").unwrap();

        let secret = Secret::<String>::from_file(file.path()).unwrap();
        assert_eq!(secret.expose_secret(), "service-account-token");
    }

    #[test]
    fn test_secret_from_missing_file() {
        let result = Secret::<String>::from_file("/nonexistent/token");
        assert!(matches!(result, Err(SetupError::Secret(_))));
    }

    // Resolves to the inherent method only when `T: Serialize`
    struct SerdeCheck<T>(std::marker::PhantomData<T>);

    trait NotSerializable {
        fn serializable(&self) -> bool {
            false
        }
    }

    impl<T> NotSerializable for SerdeCheck<T> {}

    impl<T: serde::Serialize> SerdeCheck<T> {
        fn serializable(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_secret_is_not_serializable() {
        assert!(SerdeCheck::<String>(std::marker::PhantomData).serializable());
        assert!(!SerdeCheck::<Secret<String>>(std::marker::PhantomData).serializable());
    }
}
