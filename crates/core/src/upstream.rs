use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the gateway authenticates itself to an [`Upstream`] before forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    Bearer,
    Header,
    Basic,
}

/// A backend HTTP service the gateway forwards matched requests to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub max_idle_conns: u32,
    #[serde(with = "duration_millis")]
    pub idle_conn_timeout: Duration,
    pub auth_type: AuthType,
    pub auth_header: Option<String>,
    #[serde(with = "secret_string_serde")]
    pub auth_value: SecretString,
    pub enabled: bool,
}

impl Upstream {
    /// Build the `(name, value)` header pair the gateway injects into the
    /// forwarded request for this upstream's own authentication, if any.
    ///
    /// `auth_value` is never logged or reflected; callers must not `Debug`
    /// the returned value outside the header it's placed in.
    #[must_use]
    pub fn auth_header_pair(&self) -> Option<(String, String)> {
        use secrecy::ExposeSecret;

        match self.auth_type {
            AuthType::None => None,
            AuthType::Bearer => Some((
                "Authorization".to_owned(),
                format!("Bearer {}", self.auth_value.expose_secret()),
            )),
            AuthType::Header => {
                let header = self.auth_header.clone().unwrap_or_else(|| "X-Auth".into());
                Some((header, self.auth_value.expose_secret().to_owned()))
            }
            AuthType::Basic => {
                use base64::Engine;
                let encoded =
                    base64::engine::general_purpose::STANDARD.encode(self.auth_value.expose_secret());
                Some(("Authorization".to_owned(), format!("Basic {encoded}")))
            }
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        #[allow(clippy::cast_possible_truncation)]
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod secret_string_serde {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &SecretString, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SecretString, D::Error> {
        Ok(SecretString::from(String::deserialize(d)?))
    }
}
