use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{Interval, MissedTickBehavior};
use tributary_engine::adapter::{ack_fn, AckFn, AckSource};
use tributary_engine::config::types::parse_duration;
use tributary_types::ack::AckResult;
use tributary_types::error::{AdapterError, ConnectorError};
use tributary_types::message::{Batch, Part};

fn default_message() -> String {
    "hello world".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenerateConfig {
    /// Messages to emit before closing; 0 means no limit.
    #[serde(default)]
    count: u64,
    #[serde(default = "default_message")]
    message: String,
    /// Pause between messages, e.g. `100ms`.
    #[serde(default)]
    interval: Option<String>,
}

/// Emits a fixed message, each acknowledged on its own.
pub struct Generate {
    count: u64,
    message: String,
    interval: Option<Duration>,
    ticker: Option<Interval>,
    emitted: u64,
}

impl Generate {
    /// # Errors
    ///
    /// Returns a config error for unknown keys or an unparsable interval.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConnectorError> {
        let cfg: GenerateConfig = super::parse_config("generate", config)?;
        let interval = cfg
            .interval
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|e| ConnectorError::config("INVALID_CONFIG", format!("generate: {e:#}")))?
            .filter(|d| !d.is_zero());
        Ok(Self {
            count: cfg.count,
            message: cfg.message,
            interval,
            ticker: None,
            emitted: 0,
        })
    }
}

#[async_trait]
impl AckSource for Generate {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        if let Some(period) = self.interval {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<(Batch, AckFn), AdapterError> {
        if self.count > 0 && self.emitted >= self.count {
            return Err(AdapterError::Closed);
        }
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.tick().await;
        }

        let index = self.emitted;
        self.emitted += 1;
        let mut part = Part::new(self.message.clone());
        part.metadata_set("generate_index", index.to_string());

        let ack = ack_fn(move |result| async move {
            if !result.is_ok() {
                tracing::debug!(input = "generate", index, result = ?result, "Message rejected");
            }
            Ok(())
        });
        Ok((Batch::from_parts(vec![part]), ack))
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        self.ticker = None;
        Ok(())
    }
}
