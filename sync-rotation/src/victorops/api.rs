use crate::errors::IncidentApiError;
use crate::utils::ResponseExt;
use crate::victorops::OncallRead;
use log::trace;
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use rotation_data::v1;
use secrecy::{ExposeSecret, SecretString};

const USER_AGENT: &str = concat!("oncall-rotation/", env!("CARGO_PKG_VERSION"));

/// Access to the VictorOps public API
pub struct VictorOpsApi {
    client: Client,
    base_url: String,
    api_id: SecretString,
    api_key: SecretString,
}

impl VictorOpsApi {
    pub fn new(api_id: SecretString, api_key: SecretString) -> anyhow::Result<Self> {
        let base_url =
            std::env::var("VICTOROPS_BASE_URL").unwrap_or_else(|_| v1::BASE_URL.to_string());
        Self::with_base_url(base_url, api_id, api_key)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_id: SecretString,
        api_key: SecretString,
    ) -> anyhow::Result<Self> {
        let mut map = HeaderMap::default();
        map.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        map.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        Ok(Self {
            client: reqwest::blocking::ClientBuilder::default()
                .default_headers(map)
                .build()?,
            base_url: base_url.into(),
            api_id,
            api_key,
        })
    }

    fn credential(secret: &SecretString) -> anyhow::Result<HeaderValue> {
        let mut value = HeaderValue::from_str(secret.expose_secret())?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl OncallRead for VictorOpsApi {
    fn current_oncall(&self) -> anyhow::Result<v1::OncallCurrent> {
        let url = format!("{}{}", self.base_url, v1::ONCALL_CURRENT_PATH);
        trace!("http request: GET {url}");
        let response = self
            .client
            .get(&url)
            .header("X-VO-Api-Id", Self::credential(&self.api_id)?)
            .header("X-VO-Api-Key", Self::credential(&self.api_key)?)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(IncidentApiError::Status { status, body }.into());
        }
        response.json_annotated()
    }
}
