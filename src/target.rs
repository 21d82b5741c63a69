//! Request targets accepted by the verb helpers.
//!
//! [`IntoTarget`] lets [`Client::get`](crate::Client::get) and friends take a
//! URI as a string, an [`http::Uri`], a [`url::Url`], or nothing at all (when
//! the option bag or the client defaults carry the target).

use http::Uri;
use url::Url;

/// Conversion trait for values usable as a request target.
pub trait IntoTarget {
    /// Returns the target as a string, absolute or relative to `base_uri`, or
    /// `None` to keep the target from the options.
    fn into_target(self) -> Option<String>;
}

impl IntoTarget for &str {
    fn into_target(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl IntoTarget for String {
    fn into_target(self) -> Option<String> {
        Some(self)
    }
}

impl IntoTarget for &String {
    fn into_target(self) -> Option<String> {
        Some(self.clone())
    }
}

impl IntoTarget for Uri {
    fn into_target(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl IntoTarget for &Uri {
    fn into_target(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl IntoTarget for Url {
    fn into_target(self) -> Option<String> {
        Some(self.into())
    }
}

impl IntoTarget for &Url {
    fn into_target(self) -> Option<String> {
        Some(self.as_str().to_string())
    }
}

impl IntoTarget for () {
    fn into_target(self) -> Option<String> {
        None
    }
}

impl<T: IntoTarget> IntoTarget for Option<T> {
    fn into_target(self) -> Option<String> {
        self.and_then(IntoTarget::into_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_common_types() {
        assert_eq!("/items".into_target().as_deref(), Some("/items"));
        assert_eq!(
            Uri::from_static("http://h/a?b=1").into_target().as_deref(),
            Some("http://h/a?b=1")
        );
        let url = Url::parse("https://h/x").unwrap();
        assert_eq!((&url).into_target().as_deref(), Some("https://h/x"));
        assert_eq!(().into_target(), None);
        assert_eq!(None::<&str>.into_target(), None);
        assert_eq!(Some(String::from("p")).into_target().as_deref(), Some("p"));
    }
}
