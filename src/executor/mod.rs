//! Default executors resolved from a transition's type tag.
//!
//! The set of node types is closed: [`NodeType`] lists every tag the
//! registry understands. Unknown tags resolve to no executor. An
//! explicitly supplied executor always takes precedence over the
//! registry; see [`crate::net::NetBuilder::build_with`].

mod http;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{DefinitionError, ExecuteError};
use crate::firing::{Context, Execute};
use crate::net::Marking;

pub use http::{HttpConfig, HttpExecutor};

/// Transition type tags that resolve to a built-in executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Perform an HTTP request; config `{url, method?, headers?, body?}`.
    Http,
    /// Wait; config `{delayMs}`.
    Timer,
    /// Merge a fixed object into the context.
    Assign,
}

impl FromStr for NodeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(NodeType::Http),
            "timer" => Ok(NodeType::Timer),
            "assign" => Ok(NodeType::Assign),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Http => write!(f, "http"),
            NodeType::Timer => write!(f, "timer"),
            NodeType::Assign => write!(f, "assign"),
        }
    }
}

/// Config of the `timer` node type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    pub delay_ms: u64,
}

/// Sleeps for the configured delay and changes nothing.
#[derive(Debug)]
pub struct TimerExecutor {
    delay: Duration,
}

#[async_trait]
impl Execute for TimerExecutor {
    async fn execute(
        &self,
        _transition: &str,
        _context: &Context,
        _marking: &Marking,
    ) -> Result<Context, ExecuteError> {
        tokio::time::sleep(self.delay).await;
        Ok(Context::new())
    }
}

/// Merges a fixed object into the context.
#[derive(Debug)]
pub struct AssignExecutor {
    values: Context,
}

#[async_trait]
impl Execute for AssignExecutor {
    async fn execute(
        &self,
        _transition: &str,
        _context: &Context,
        _marking: &Marking,
    ) -> Result<Context, ExecuteError> {
        Ok(self.values.clone())
    }
}

/// Resolves `(type, config)` pairs into executors. Passed explicitly to
/// whoever builds definitions; there is no process-wide registry.
#[derive(Debug, Clone, Default)]
pub struct ExecutorRegistry {
    client: Client,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Validate `config` for `tag` and build its executor. Unknown tags
    /// yield `Ok(None)`.
    pub fn resolve(
        &self,
        transition: &str,
        tag: &str,
        config: Option<&Value>,
    ) -> Result<Option<Arc<dyn Execute>>, DefinitionError> {
        let Ok(kind) = tag.parse::<NodeType>() else {
            tracing::debug!(transition, tag, "no default executor for type");
            return Ok(None);
        };
        let exec: Arc<dyn Execute> = match kind {
            NodeType::Http => {
                let cfg: HttpConfig = parse_config(transition, kind, config)?;
                Arc::new(HttpExecutor::new(self.client.clone(), cfg).map_err(|message| {
                    invalid(transition, kind, message)
                })?)
            }
            NodeType::Timer => {
                let cfg: TimerConfig = parse_config(transition, kind, config)?;
                Arc::new(TimerExecutor {
                    delay: Duration::from_millis(cfg.delay_ms),
                })
            }
            NodeType::Assign => match config {
                Some(Value::Object(values)) => Arc::new(AssignExecutor {
                    values: values.clone(),
                }),
                _ => return Err(invalid(transition, kind, "config must be an object")),
            },
        };
        Ok(Some(exec))
    }
}

fn parse_config<T: DeserializeOwned>(
    transition: &str,
    kind: NodeType,
    config: Option<&Value>,
) -> Result<T, DefinitionError> {
    let value = config.cloned().unwrap_or(Value::Object(Default::default()));
    serde_json::from_value(value).map_err(|e| invalid(transition, kind, e.to_string()))
}

fn invalid(transition: &str, kind: NodeType, message: impl Into<String>) -> DefinitionError {
    DefinitionError::InvalidConfig {
        transition: transition.to_string(),
        kind: kind.to_string(),
        message: message.into(),
    }
}
