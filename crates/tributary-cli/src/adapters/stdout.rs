use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tributary_engine::adapter::Sink;
use tributary_types::error::{AdapterError, ConnectorError};
use tributary_types::message::Batch;

fn default_delimiter() -> String {
    "\n".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StdoutConfig {
    /// Written after every part.
    #[serde(default = "default_delimiter")]
    delimiter: String,
}

/// Writes every part to standard output followed by a delimiter.
pub struct Stdout {
    delimiter: Vec<u8>,
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl Stdout {
    /// # Errors
    ///
    /// Returns a config error for unknown keys.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConnectorError> {
        let cfg: StdoutConfig = super::parse_config("stdout", config)?;
        Ok(Self::with_writer(cfg.delimiter, Box::new(tokio::io::stdout())))
    }

    fn with_writer(delimiter: String, out: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            delimiter: delimiter.into_bytes(),
            out: Mutex::new(out),
        }
    }
}

fn write_error(err: &std::io::Error) -> AdapterError {
    if err.kind() == std::io::ErrorKind::BrokenPipe {
        AdapterError::Closed
    } else {
        AdapterError::Failed(ConnectorError::delivery("WRITE_FAILED", err.to_string()))
    }
}

#[async_trait]
impl Sink for Stdout {
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn write(&self, batch: &Batch) -> Result<(), AdapterError> {
        let mut out = self.out.lock().await;
        for part in batch.iter() {
            out.write_all(part.as_bytes()).await.map_err(|e| write_error(&e))?;
            out.write_all(&self.delimiter).await.map_err(|e| write_error(&e))?;
        }
        out.flush().await.map_err(|e| write_error(&e))
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.out.lock().await.flush().await.map_err(|e| write_error(&e))
    }
}

/// Accepts and discards everything.
#[derive(Debug, Default)]
pub struct Discard;

#[async_trait]
impl Sink for Discard {
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn write(&self, _batch: &Batch) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
