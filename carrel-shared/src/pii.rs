use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wrapper for credentials and contact details that must never show up in logs.
///
/// `Debug` and `Display` print a fixed mask. Serialization still emits the real
/// value, so the wrapper can sit inside request and response DTOs.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Masked<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_output_is_masked() {
        let secret = Masked::new("hunter22".to_string());
        assert_eq!(format!("{:?}", secret), "********");
        assert_eq!(format!("{}", secret), "********");
        assert_eq!(secret.expose(), "hunter22");
    }

    #[test]
    fn test_deserializes_transparently() {
        #[derive(Deserialize)]
        struct Login {
            password: Masked<String>,
        }

        let login: Login = serde_json::from_str(r#"{"password":"hunter22"}"#).unwrap();
        assert_eq!(login.password.into_inner(), "hunter22");
    }
}
