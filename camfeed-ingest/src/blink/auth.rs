use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::BlinkError;

const BLINK_DOMAIN: &str = "immedia-semi.com";

/// The parts of the auth file written by the login flow that are needed to talk to the
/// API. Everything else in the file is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Auth {
    pub token: String,
    #[serde(deserialize_with = "number_or_string")]
    pub account_id: String,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

impl Auth {
    pub fn from_file(path: &Path) -> Result<Self, BlinkError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlinkError::MissingAuthFile(path.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|source| BlinkError::InvalidAuthFile {
            path: PathBuf::from(path),
            source,
        })
    }

    /// Something like `https://rest-u011.immedia-semi.com`.
    pub fn base_url(&self) -> Result<String, BlinkError> {
        if let Some(region) = self.region_id.as_deref().filter(|r| !r.is_empty()) {
            return Ok(format!("https://rest-{region}.{BLINK_DOMAIN}"));
        }

        match self.host.as_deref() {
            Some(host) if host.starts_with("https://") || host.starts_with("http://") => {
                Ok(host.trim_end_matches('/').to_owned())
            }
            Some(host) if host.starts_with("rest-") => Ok(format!("https://{host}")),
            Some(host) if !host.is_empty() => Ok(format!("https://rest-{host}")),
            _ => Err(BlinkError::NoRegion),
        }
    }
}

fn number_or_string<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(u64),
        Text(String),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Number(n) => n.to_string(),
        Id::Text(s) => s,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn auth(json: &str) -> Auth {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn base_url_from_region() {
        let a = auth(r#"{"token": "t", "account_id": 42, "region_id": "u011"}"#);
        assert_eq!("42", a.account_id);
        assert_eq!("https://rest-u011.immedia-semi.com", a.base_url().unwrap());
    }

    #[test]
    fn base_url_from_host() {
        let a = auth(r#"{"token": "t", "account_id": "7", "host": "u014.immedia-semi.com"}"#);
        assert_eq!("https://rest-u014.immedia-semi.com", a.base_url().unwrap());

        let a = auth(r#"{"token": "t", "account_id": "7", "host": "http://localhost:8080/"}"#);
        assert_eq!("http://localhost:8080", a.base_url().unwrap());
    }

    #[test]
    fn no_region() {
        let a = auth(r#"{"token": "t", "account_id": 1, "username": "someone"}"#);
        assert!(matches!(a.base_url(), Err(BlinkError::NoRegion)));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blink_auth.json");
        assert!(matches!(
            Auth::from_file(&path),
            Err(BlinkError::MissingAuthFile(p)) if p == path
        ));
    }

    #[test]
    fn invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blink_auth.json");
        std::fs::write(&path, r#"{"account_id": 1}"#).unwrap();
        assert!(matches!(
            Auth::from_file(&path),
            Err(BlinkError::InvalidAuthFile { .. })
        ));
    }
}
