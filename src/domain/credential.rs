use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::platform::Platform;

/// Per-platform login material, stored as a flat string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(pub HashMap<String, String>);

impl Credential {
    /// Builds a credential from a raw `Cookie` header value. Bilibili keeps
    /// `SESSDATA` as its own field.
    pub fn from_cookie_string(platform: Platform, cookie: &str) -> Self {
        let mut fields = HashMap::new();
        fields.insert("cookie".to_string(), cookie.trim().to_string());

        if platform == Platform::Bilibili {
            let sessdata = cookie
                .split(';')
                .filter_map(|pair| pair.split_once('='))
                .find(|(name, _)| name.trim() == "SESSDATA")
                .map(|(_, value)| value.trim().to_string());
            if let Some(value) = sessdata {
                fields.insert("SESSDATA".to_string(), value);
            }
        }

        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Value for the request `Cookie` header, if the credential carries one.
    pub fn cookie_header(&self, platform: Platform) -> Option<String> {
        match platform {
            Platform::Bilibili => self
                .get("SESSDATA")
                .map(|value| format!("SESSDATA={value}"))
                .or_else(|| self.get("cookie").map(str::to_string)),
            _ => self.get("cookie").map(str::to_string),
        }
        .filter(|header| !header.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilibili_extracts_sessdata() {
        let cred = Credential::from_cookie_string(
            Platform::Bilibili,
            "buvid3=abc; SESSDATA=xyz%2C123; bili_jct=t",
        );
        assert_eq!(cred.get("SESSDATA"), Some("xyz%2C123"));
        assert_eq!(
            cred.cookie_header(Platform::Bilibili).as_deref(),
            Some("SESSDATA=xyz%2C123")
        );
    }

    #[test]
    fn other_platforms_send_the_raw_cookie() {
        let cred = Credential::from_cookie_string(Platform::Douyin, " ttwid=1; odin_tt=2 ");
        assert_eq!(
            cred.cookie_header(Platform::Douyin).as_deref(),
            Some("ttwid=1; odin_tt=2")
        );
        assert!(cred.get("SESSDATA").is_none());
    }

    #[test]
    fn empty_cookie_yields_no_header() {
        let cred = Credential::from_cookie_string(Platform::Toutiao, "");
        assert!(cred.cookie_header(Platform::Toutiao).is_none());
    }
}
