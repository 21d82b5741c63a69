use base64::prelude::*;
use http::HeaderValue;
use secrecy::{ExposeSecret as _, SecretString};

/// Basic credentials.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    /// The user name.
    pub username: String,
    /// The password.
    pub password: SecretString,
}

impl BasicAuth {
    /// Creates credentials from a user name and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Renders the `Authorization` header value.
    pub(crate) fn header_value(&self) -> Result<HeaderValue, http::header::InvalidHeaderValue> {
        let credentials = format!("{}:{}", self.username, self.password.expose_secret());
        let mut value =
            HeaderValue::from_str(&format!("Basic {}", BASE64_STANDARD.encode(credentials)))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Credentials as accepted in an option bag.
#[derive(Debug, Clone)]
pub enum Auth {
    /// A `(username, password)` pair.
    Pair(String, SecretString),
    /// Already structured credentials.
    Credentials(BasicAuth),
}

impl Auth {
    /// Converts either form into [`BasicAuth`].
    #[must_use]
    pub fn normalize(self) -> BasicAuth {
        match self {
            Self::Pair(username, password) => BasicAuth { username, password },
            Self::Credentials(auth) => auth,
        }
    }
}

impl<U: Into<String>, P: Into<String>> From<(U, P)> for Auth {
    fn from((username, password): (U, P)) -> Self {
        Self::Pair(username.into(), SecretString::from(password.into()))
    }
}

impl From<BasicAuth> for Auth {
    fn from(value: BasicAuth) -> Self {
        Self::Credentials(value)
    }
}
