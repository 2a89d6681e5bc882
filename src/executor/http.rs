use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ExecuteError;
use crate::firing::{Context, Execute};
use crate::net::Marking;

/// Config of the `http` node type.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    /// Defaults to `GET`.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Sent as JSON when present.
    #[serde(default)]
    pub body: Option<Value>,
}

/// Sends one request per fire and merges `{"response": {status, body}}`
/// into the context. Non-2xx responses fail the fire.
#[derive(Debug)]
pub struct HttpExecutor {
    client: Client,
    method: Method,
    url: Url,
    headers: BTreeMap<String, String>,
    body: Option<Value>,
}

impl HttpExecutor {
    pub fn new(client: Client, config: HttpConfig) -> Result<Self, String> {
        let url = Url::parse(&config.url).map_err(|e| format!("invalid url '{}': {e}", config.url))?;
        let method = match config.method.as_deref() {
            None => Method::GET,
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| format!("invalid method '{m}'"))?,
        };
        Ok(Self {
            client,
            method,
            url,
            headers: config.headers,
            body: config.body,
        })
    }
}

#[async_trait]
impl Execute for HttpExecutor {
    async fn execute(
        &self,
        transition: &str,
        _context: &Context,
        _marking: &Marking,
    ) -> Result<Context, ExecuteError> {
        let mut req = self.client.request(self.method.clone(), self.url.clone());
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }
        if let Some(body) = &self.body {
            req = req.json(body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ExecuteError::new(transition, format!("request failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExecuteError::new(transition, format!("reading body failed: {e}")))?;

        if !status.is_success() {
            return Err(ExecuteError::new(
                transition,
                format!("{} {} returned {status}: {text}", self.method, self.url),
            ));
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        let mut update = Context::new();
        update.insert(
            "response".into(),
            json!({ "status": status.as_u16(), "body": body }),
        );
        Ok(update)
    }
}
