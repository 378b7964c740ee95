use crate::config::ClientSettings;
use crate::retrieval::error::RetrievalError;
use log::debug;
use std::path::{Path, PathBuf};

pub const DEFAULT_CDS_URL: &str = "https://cds.climate.copernicus.eu/api";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub url: String,
    pub key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Resolves credentials from the settings, then `CDSAPI_URL`/`CDSAPI_KEY`, then `~/.cdsapirc`.
    pub fn resolve(settings: &ClientSettings) -> Result<Self, RetrievalError> {
        let rc_path = dirs::home_dir().map(|home| home.join(".cdsapirc"));
        Self::resolve_with(settings, |name| std::env::var(name).ok(), rc_path.as_deref())
    }

    pub fn resolve_with(
        settings: &ClientSettings,
        env: impl Fn(&str) -> Option<String>,
        rc_path: Option<&Path>,
    ) -> Result<Self, RetrievalError> {
        let rc = match rc_path {
            Some(path) => read_cdsapirc(path)?,
            None => RcFile::default(),
        };

        let url = settings
            .url
            .clone()
            .or_else(|| env("CDSAPI_URL"))
            .or(rc.url)
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CDS_URL.to_string());
        let key = settings
            .key
            .clone()
            .or_else(|| env("CDSAPI_KEY"))
            .or(rc.key)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                RetrievalError::Credentials(
                    "set client.key, CDSAPI_KEY or a 'key:' line in ~/.cdsapirc".to_string(),
                )
            })?;

        Ok(Credentials {
            url: url.trim().trim_end_matches('/').to_string(),
            key: key.trim().to_string(),
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct RcFile {
    url: Option<String>,
    key: Option<String>,
}

fn read_cdsapirc(path: &Path) -> Result<RcFile, RetrievalError> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!("Reading CDS credentials from {}", path.display());
            Ok(parse_cdsapirc(&text))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RcFile::default()),
        Err(e) => Err(RetrievalError::Io(PathBuf::from(path), e)),
    }
}

fn parse_cdsapirc(text: &str) -> RcFile {
    let mut rc = RcFile::default();
    for line in text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim() {
            "url" => rc.url = Some(value),
            "key" => rc.key = Some(value),
            _ => {}
        }
    }
    rc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn settings_take_precedence() {
        let settings = ClientSettings {
            url: Some("https://example.test/api/".into()),
            key: Some("abc".into()),
            ..ClientSettings::default()
        };
        let creds =
            Credentials::resolve_with(&settings, |_| Some("env".into()), None).unwrap();
        assert_eq!(creds.url, "https://example.test/api");
        assert_eq!(creds.key, "abc");
    }

    #[test]
    fn falls_back_to_env_then_rc_file() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join(".cdsapirc");
        std::fs::write(&rc, "url: https://rc.test/api\nkey: rc-key\n").unwrap();

        let settings = ClientSettings::default();
        let from_rc = Credentials::resolve_with(&settings, no_env, Some(&rc)).unwrap();
        assert_eq!(from_rc.url, "https://rc.test/api");
        assert_eq!(from_rc.key, "rc-key");

        let from_env = Credentials::resolve_with(
            &settings,
            |name| (name == "CDSAPI_KEY").then(|| "env-key".to_string()),
            Some(&rc),
        )
        .unwrap();
        assert_eq!(from_env.key, "env-key");
        assert_eq!(from_env.url, "https://rc.test/api");
    }

    #[test]
    fn missing_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Credentials::resolve_with(
            &ClientSettings::default(),
            no_env,
            Some(&dir.path().join("missing")),
        )
        .unwrap_err();
        assert!(matches!(err, RetrievalError::Credentials(_)));
    }

    #[test]
    fn debug_output_hides_key() {
        let creds = Credentials {
            url: DEFAULT_CDS_URL.into(),
            key: "secret".into(),
        };
        assert!(!format!("{creds:?}").contains("secret"));
    }
}
