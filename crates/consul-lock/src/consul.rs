use async_trait::async_trait;
use consul_lock_core::{
    BackendConfig, KvBackend, KvEntry, KvRead, LockError, SessionCreated, SessionId,
    SessionRequest, WatchIndex,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const INDEX_HEADER: &str = "X-Consul-Index";

/// [`KvBackend`] over a Consul agent's HTTP API
pub struct ConsulBackend {
    client: Client,
    base: Url,
    namespace: String,
}

impl ConsulBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, LockError> {
        let base = Url::parse(&config.address).map_err(|e| {
            LockError::Configuration(format!("invalid backend address {}: {e}", config.address))
        })?;
        if base.cannot_be_a_base() {
            return Err(LockError::Configuration(format!(
                "backend address {} cannot carry a path",
                config.address
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(transport)?;

        Ok(Self {
            client,
            base,
            namespace: config.namespace.clone(),
        })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// URL of `key` under the namespace. Every `/`-separated segment must be
    /// a plain name; URL normalisation would fold `.`, `..` and empty
    /// segments, letting distinct keys share one entry.
    fn kv_url(&self, key: &str) -> Result<Url, LockError> {
        if key.split('/').any(|segment| matches!(segment, "" | "." | "..")) {
            return Err(LockError::Configuration(format!("invalid lock key {key:?}")));
        }
        Ok(self.endpoint(
            ["v1", "kv", self.namespace.as_str()]
                .into_iter()
                .chain(key.split('/')),
        ))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "calling backend");
        self.client.request(method, url)
    }
}

#[async_trait]
impl KvBackend for ConsulBackend {
    async fn read(
        &self,
        key: &str,
        index: WatchIndex,
        wait: Duration,
    ) -> Result<KvRead, LockError> {
        let mut url = self.kv_url(key)?;
        if let Some(index) = index.get() {
            url.query_pairs_mut()
                .append_pair("wait", &format_wait(wait))
                .append_pair("index", &index.to_string());
        }

        let res = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(transport)?;
        let index = index_header(&res);

        match res.status() {
            StatusCode::NOT_FOUND => Ok(KvRead { entry: None, index }),
            StatusCode::OK => {
                let entries: Vec<KvEntry> = decode(res, "GET kv").await?;
                let entry = entries
                    .into_iter()
                    .next()
                    .ok_or_else(|| LockError::Malformed(format!("empty result for key {key}")))?;
                debug!(?entry, ?index, "read lock entry");
                Ok(KvRead {
                    entry: Some(entry),
                    index,
                })
            }
            status => Err(LockError::unexpected_status(
                status.as_u16(),
                format!("GET kv {key}"),
            )),
        }
    }

    async fn create_session(
        &self,
        request: Option<&SessionRequest>,
    ) -> Result<SessionId, LockError> {
        let mut builder = self.request(Method::PUT, self.endpoint(["v1", "session", "create"]));
        if let Some(request) = request {
            debug!(?request, "session payload");
            builder = builder.json(request);
        }

        let res = builder.send().await.map_err(transport)?;
        let created: SessionCreated = decode_ok(res, "PUT session/create").await?;
        if created.id.is_empty() {
            return Err(LockError::Malformed("session created without an ID".to_string()));
        }
        Ok(SessionId::new(created.id))
    }

    async fn acquire(&self, key: &str, session: &SessionId) -> Result<bool, LockError> {
        let mut url = self.kv_url(key)?;
        url.query_pairs_mut().append_pair("acquire", session.as_str());

        let res = self
            .request(Method::PUT, url)
            .send()
            .await
            .map_err(transport)?;
        decode_ok(res, "PUT kv acquire").await
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<bool, LockError> {
        let url = self.endpoint(["v1", "session", "destroy", session.as_str()]);
        let res = self
            .request(Method::PUT, url)
            .send()
            .await
            .map_err(transport)?;
        decode_ok(res, "PUT session/destroy").await
    }

    async fn delete(&self, key: &str) -> Result<bool, LockError> {
        let res = self
            .request(Method::DELETE, self.kv_url(key)?)
            .send()
            .await
            .map_err(transport)?;
        decode_ok(res, "DELETE kv").await
    }
}

fn transport(e: reqwest::Error) -> LockError {
    LockError::Transport(e.to_string())
}

/// `X-Consul-Index`, when present and numeric
fn index_header(res: &Response) -> Option<u64> {
    res.headers()
        .get(INDEX_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Consul duration string for a blocking query wait
fn format_wait(wait: Duration) -> String {
    if wait.subsec_millis() == 0 && wait.as_secs() > 0 {
        format!("{}s", wait.as_secs())
    } else {
        format!("{}ms", wait.as_millis().max(1))
    }
}

async fn decode_ok<T: DeserializeOwned>(res: Response, context: &str) -> Result<T, LockError> {
    let status = res.status();
    if status != StatusCode::OK {
        return Err(LockError::unexpected_status(status.as_u16(), context));
    }
    decode(res, context).await
}

async fn decode<T: DeserializeOwned>(res: Response, context: &str) -> Result<T, LockError> {
    let body = res.bytes().await.map_err(transport)?;
    serde_json::from_slice(&body).map_err(|e| LockError::Malformed(format!("{context}: {e}")))
}
