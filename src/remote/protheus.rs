//! HTTP client for the Protheus REST interface.
//!
//! Three endpoints, all behind HTTP basic auth:
//!
//! - `GET  /rest/WSGETPEDX`: table fetch (`cTabela`, `cReset`, `cCampo`/`cValor`, `cDtDe`/`cDtAte`)
//! - `POST /rest/WSCUSTOMERS`: customer create, or update with `cAltera=S`
//! - `POST /rest/WSSALESORDERS`: sales order create
//!
//! Write responses carry their result in `data[0].aRetUsr[0]`.

use super::{CreatedRecord, RemoteClient, RemoteError, RemoteResult, TableQuery};
use crate::error::{Error, Result};
use serde_json::{Map, Value, json};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const FETCH_PATH: &str = "/rest/WSGETPEDX";
const CUSTOMERS_PATH: &str = "/rest/WSCUSTOMERS";
const SALES_ORDERS_PATH: &str = "/rest/WSSALESORDERS";

const CUSTOMER_EXTRA: &[&str] = &["A1_LOJA", "CGC", "Mensagem"];
const ORDER_EXTRA: &[&str] = &["C5_CPEDX", "Mensagem"];

/// Longest remote error body kept in a message.
const MAX_ERROR_BODY: usize = 500;

/// Connection settings for the Protheus REST server.
#[derive(Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// [`RemoteClient`] over reqwest.
#[derive(Debug, Clone)]
pub struct ProtheusClient {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl ProtheusClient {
    /// Build a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be constructed.
    pub fn new(mut config: RemoteConfig) -> Result<Self> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> RemoteResult<(u16, Value)> {
        let response = request
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status, "Remote returned an error status");
            return Err(status_error(status, &body));
        }

        let body = response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(e.to_string())
            } else {
                RemoteError::Rejected {
                    status: Some(status),
                    message: format!("invalid JSON response: {e}"),
                }
            }
        })?;

        Ok((status, body))
    }
}

impl RemoteClient for ProtheusClient {
    async fn fetch_table(&self, query: &TableQuery) -> RemoteResult<Vec<Value>> {
        let params = table_params(query);
        debug!(table = %query.table, reset = query.reset, "GET {FETCH_PATH}");

        let (_, body) = self
            .send(self.client.get(self.url(FETCH_PATH)).query(&params))
            .await?;
        Ok(into_rows(body))
    }

    async fn create_customer(&self, record: &Value) -> RemoteResult<CreatedRecord> {
        let (status, body) = self
            .send(
                self.client
                    .post(self.url(CUSTOMERS_PATH))
                    .json(&json!({ "CLIENTES": [record] })),
            )
            .await?;
        created_record(&body, status, "A1_COD", CUSTOMER_EXTRA)
    }

    async fn update_customer(&self, remote_id: &str, record: &Value) -> RemoteResult<Value> {
        let record = with_remote_code(record, remote_id);
        let (_, body) = self
            .send(
                self.client
                    .post(self.url(CUSTOMERS_PATH))
                    .query(&[("cAltera", "S")])
                    .json(&json!({ "CLIENTES": [record] })),
            )
            .await?;

        Ok(ret_usr(&body).map_or_else(
            || Value::Object(Map::new()),
            |ret| pick(ret, CUSTOMER_EXTRA),
        ))
    }

    async fn create_sales_order(&self, record: &Value) -> RemoteResult<CreatedRecord> {
        let (status, body) = self
            .send(
                self.client
                    .post(self.url(SALES_ORDERS_PATH))
                    .json(&json!({ "PEDIDOS": [record] })),
            )
            .await?;
        created_record(&body, status, "C5_NUM", ORDER_EXTRA)
    }
}

fn classify(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(err.to_string())
    } else {
        RemoteError::Unreachable(err.to_string())
    }
}

/// Gateway failures mean the ERP behind the proxy is down, not that it
/// refused the payload.
fn status_error(status: u16, body: &str) -> RemoteError {
    let body = body.trim();
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", body.chars().take(MAX_ERROR_BODY).collect::<String>())
    };

    match status {
        502..=504 => RemoteError::Unreachable(message),
        _ => RemoteError::Rejected {
            status: Some(status),
            message,
        },
    }
}

fn table_params(query: &TableQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("cTabela", query.table.clone())];
    if query.reset {
        params.push(("cReset", "S".to_string()));
    }
    if let Some(filter) = &query.filter {
        params.push(("cCampo", filter.field.clone()));
        params.push(("cValor", filter.value.clone()));
    }
    if let Some(period) = &query.period {
        params.push(("cDtDe", period.from.clone()));
        params.push(("cDtAte", period.to.clone()));
    }
    params
}

fn into_rows(body: Value) -> Vec<Value> {
    match body {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// `data[0].aRetUsr[0]`, or `data.aRetUsr[0]` when the envelope is not wrapped.
fn ret_usr(body: &Value) -> Option<&Map<String, Value>> {
    let envelope = match body {
        Value::Array(items) => items.first()?,
        other => other,
    };
    envelope.get("aRetUsr")?.as_array()?.first()?.as_object()
}

fn field_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match obj.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn pick(obj: &Map<String, Value>, keys: &[&str]) -> Value {
    Value::Object(
        keys.iter()
            .filter_map(|k| obj.get(*k).map(|v| ((*k).to_string(), v.clone())))
            .collect(),
    )
}

fn created_record(
    body: &Value,
    status: u16,
    id_field: &str,
    extra_fields: &[&str],
) -> RemoteResult<CreatedRecord> {
    let Some(ret) = ret_usr(body) else {
        return Err(RemoteError::Rejected {
            status: Some(status),
            message: "response carries no aRetUsr record".to_string(),
        });
    };

    // A 2xx without the identifier is how the remote reports a business rejection
    let Some(remote_id) = field_str(ret, id_field) else {
        return Err(RemoteError::Rejected {
            status: Some(status),
            message: field_str(ret, "Mensagem")
                .unwrap_or_else(|| format!("response carries no {id_field}")),
        });
    };

    Ok(CreatedRecord {
        remote_id,
        extra: pick(ret, extra_fields),
    })
}

fn with_remote_code(record: &Value, remote_id: &str) -> Value {
    let mut record = record.clone();
    if let Some(obj) = record.as_object_mut() {
        let present = obj
            .get("A1_COD")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            obj.insert("A1_COD".to_string(), Value::String(remote_id.to_string()));
        }
    }
    record
}
