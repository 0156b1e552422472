use std::io;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::time::{sleep, Duration};

use crate::errors::AppResult;
use crate::stream::tail::{LogReader, LogSource, TailTarget};

/// Synthetic log streams for dev mode: `log line N` every `rate_ms`,
/// ending after `max_lines` when set.
#[derive(Clone, Debug)]
pub struct DevLogSource {
    rate_ms: u64,
    max_lines: Option<u64>,
}

impl DevLogSource {
    pub fn new(rate_ms: u64, max_lines: Option<u64>) -> Self {
        Self { rate_ms, max_lines }
    }
}

#[async_trait]
impl LogSource for DevLogSource {
    async fn open(&self, target: &TailTarget) -> AppResult<LogReader> {
        let rate = Duration::from_millis(self.rate_ms);
        let max_lines = self.max_lines;
        let container = target.container.clone();

        let lines = stream::unfold(0u64, move |counter| {
            let container = container.clone();
            async move {
                if max_lines.is_some_and(|max| counter >= max) {
                    return None;
                }
                if counter > 0 {
                    sleep(rate).await;
                }
                let line = format!("{container} log line {}\n", counter + 1);
                Some((Ok::<_, io::Error>(line.into_bytes()), counter + 1))
            }
        });

        Ok(Box::pin(lines.boxed().into_async_read()))
    }
}
