use crate::{
    DataverseConfig, DataverseError, ENTITY_DEFINITIONS_QUERY, OrgVersion, Result, batch,
    parse_entity_definitions,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use std::sync::Arc;
use tally::{
    ConnectionFactory, CountConnection, CountRequestItem, EntityTarget, ItemResponse,
    TransportError,
};

/// One HTTP client bound to a Dataverse organization.
///
/// Clones share the underlying connection pool. Use
/// [`DataverseConnector::try_clone`] for an independent connection.
#[derive(Debug, Clone)]
pub struct DataverseConnection {
    client: reqwest::Client,
    config: Arc<DataverseConfig>,
}

#[derive(Deserialize)]
struct VersionBody {
    #[serde(rename = "Version")]
    version: String,
}

impl DataverseConnection {
    /// Builds a connection with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`DataverseError::Request`] if the HTTP client cannot be built.
    pub fn new(config: Arc<DataverseConfig>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, config))
    }

    /// Wraps an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: Arc<DataverseConfig>) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &DataverseConfig {
        &self.config
    }

    /// Reads the organization version via `RetrieveVersion()`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-2xx statuses and malformed bodies.
    pub async fn retrieve_version(&self) -> Result<OrgVersion> {
        let body = self.get_json("RetrieveVersion()").await?;
        let VersionBody { version } = serde_json::from_str(&body)
            .map_err(|e| DataverseError::Decode(format!("version response: {e}")))?;
        version.parse()
    }

    /// Loads every entity of the organization as an unselected target.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-2xx statuses and malformed bodies.
    pub async fn retrieve_entities(&self) -> Result<Vec<EntityTarget>> {
        let body = self.get_json(ENTITY_DEFINITIONS_QUERY).await?;
        parse_entity_definitions(&body)
    }

    async fn get_json(&self, path: &str) -> Result<String> {
        let url = format!("{}{path}", self.config.service_root());
        let response = self
            .authorize(self.client.get(url))
            .header(ACCEPT, "application/json")
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .send()
            .await?;

        Ok(Self::ensure_success(response).await?.text().await?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Returns the response unchanged on a 2xx status, otherwise a
    /// [`DataverseError::Status`] carrying the body.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read body: {e}>"));
        Err(DataverseError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Posts a `$batch` counting `items`. Returns the response content type
    /// and body.
    async fn post_batch(&self, items: &[CountRequestItem]) -> Result<(String, String)> {
        let service_root = self.config.service_root();
        let boundary = batch::boundary();
        let body = batch::encode_batch(&boundary, &service_root, items);

        let response = self
            .authorize(self.client.post(format!("{service_root}$batch")))
            .header(CONTENT_TYPE, batch::content_type(&boundary))
            .header(ACCEPT, "application/json")
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .header("Prefer", "odata.continue-on-error")
            .body(body)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        Ok((content_type, response.text().await?))
    }
}

impl CountConnection for DataverseConnection {
    async fn execute_multiple(
        &self,
        items: &[CountRequestItem],
    ) -> core::result::Result<Vec<ItemResponse>, TransportError> {
        #[cfg(feature = "tracing")]
        tracing::trace!(items = items.len(), "Posting $batch");

        let (content_type, body) = self.post_batch(items).await?;
        batch::parse_batch_response(&content_type, &body)
    }
}

/// Connection factory for a Dataverse organization.
///
/// Each [`try_clone`](ConnectionFactory::try_clone) builds a fresh HTTP
/// client so workers never share a connection pool; the connector's own
/// client serves as the shared fallback.
#[derive(Debug, Clone)]
pub struct DataverseConnector {
    config: Arc<DataverseConfig>,
    shared: DataverseConnection,
}

impl DataverseConnector {
    /// # Errors
    ///
    /// Returns [`DataverseError::InvalidConfig`] for an invalid `config`, or
    /// [`DataverseError::Request`] if the HTTP client cannot be built.
    pub fn new(config: DataverseConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let shared = DataverseConnection::new(Arc::clone(&config))?;
        Ok(Self { config, shared })
    }

    pub fn config(&self) -> &DataverseConfig {
        &self.config
    }

    /// Reads the organization version and fails unless it supports fast
    /// record counting.
    ///
    /// # Errors
    ///
    /// Returns [`DataverseError::UnsupportedVersion`] below 9.0, or the
    /// error of the version request.
    pub async fn check_version(&self) -> Result<OrgVersion> {
        let version = self.shared.retrieve_version().await?;

        #[cfg(feature = "tracing")]
        tracing::info!(%version, "Organization version");

        version.ensure_record_count()?;
        Ok(version)
    }

    /// See [`DataverseConnection::retrieve_entities`].
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-2xx statuses and malformed bodies.
    pub async fn retrieve_entities(&self) -> Result<Vec<EntityTarget>> {
        self.shared.retrieve_entities().await
    }
}

impl ConnectionFactory for DataverseConnector {
    type Connection = DataverseConnection;

    fn try_clone(&self) -> Option<Self::Connection> {
        match DataverseConnection::new(Arc::clone(&self.config)) {
            Ok(connection) => Some(connection),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to clone Dataverse connection: {_e}");
                None
            }
        }
    }

    fn shared(&self) -> &Self::Connection {
        &self.shared
    }
}
