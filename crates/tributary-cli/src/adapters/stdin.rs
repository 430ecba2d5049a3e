use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tributary_engine::adapter::Source;
use tributary_types::ack::AckResult;
use tributary_types::error::{AdapterError, ConnectorError};
use tributary_types::message::{Batch, Part};

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StdinConfig {
    /// Skip blank lines instead of emitting empty messages.
    #[serde(default)]
    skip_empty: bool,
}

/// Reads one message per line from standard input until EOF.
///
/// Lines are raw bytes; they need not be UTF-8.
pub struct Stdin {
    skip_empty: bool,
    open: Option<Box<dyn FnOnce() -> Box<dyn AsyncRead + Send + Unpin> + Send>>,
    reader: Option<Reader>,
}

impl Stdin {
    /// # Errors
    ///
    /// Returns a config error for unknown keys.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConnectorError> {
        let cfg: StdinConfig = super::parse_config("stdin", config)?;
        Ok(Self::with_reader(cfg.skip_empty, || Box::new(tokio::io::stdin())))
    }

    fn with_reader<F>(skip_empty: bool, open: F) -> Self
    where
        F: FnOnce() -> Box<dyn AsyncRead + Send + Unpin> + Send + 'static,
    {
        Self {
            skip_empty,
            open: Some(Box::new(open)),
            reader: None,
        }
    }
}

/// Drop a trailing `\n` or `\r\n`.
fn trim_newline(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

#[async_trait]
impl Source for Stdin {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        if self.reader.is_none() {
            let open = self.open.take().ok_or(AdapterError::Closed)?;
            self.reader = Some(BufReader::new(open()));
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Batch, AdapterError> {
        let reader = self.reader.as_mut().ok_or(AdapterError::NotConnected)?;
        loop {
            let mut line = Vec::new();
            let n = reader.read_until(b'\n', &mut line).await.map_err(|e| {
                AdapterError::Failed(ConnectorError::data("READ_FAILED", e.to_string()))
            })?;
            if n == 0 {
                return Err(AdapterError::Closed);
            }
            trim_newline(&mut line);
            if self.skip_empty && line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Batch::from_parts(vec![Part::new(line)]));
        }
    }

    async fn acknowledge(&mut self, result: AckResult) -> Result<(), AdapterError> {
        // Lines cannot be re-read, so a rejected line is only reported.
        if let AckResult::Failed(err) = &result {
            tracing::warn!(input = "stdin", error = %err, "Line was not delivered");
        } else if let AckResult::Partial(be) = &result {
            tracing::warn!(input = "stdin", error = %be, "Line was partly delivered");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        self.reader = None;
        Ok(())
    }
}
