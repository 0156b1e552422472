use std::io::{self, Write};
use std::pin::Pin;

use async_trait::async_trait;
use futures::io::AsyncBufRead;
use futures::{AsyncBufReadExt, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::errors::AppResult;
use crate::loggregator::LoggregatorWriter;

/// Longer lines are forwarded in pieces of this size.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// A live, following log stream of one container.
pub type LogReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// Opens following log streams (`follow`, no timestamps, current instance).
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn open(&self, target: &TailTarget) -> AppResult<LogReader>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TailTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

/// Streams one container's log into `writer`, one envelope per line.
///
/// Returns `Ok(())` on end of stream or cancellation and the read error
/// otherwise. The reader is dropped on every exit path, which closes the
/// underlying connection.
pub async fn tail(
    source: &dyn LogSource,
    target: &TailTarget,
    writer: &mut LoggregatorWriter,
    cancel: &CancellationToken,
) -> AppResult<()> {
    let mut reader = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        r = source.open(target) => r?,
    };

    let mut buf: Vec<u8> = Vec::with_capacity(8 * 1024);

    loop {
        buf.clear();

        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        let res = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = limited.read_until(b'\n', &mut buf) => r,
        };

        match res {
            Ok(0) => return Ok(()),
            Ok(_) if buf.last() == Some(&b'\n') => {
                forward(writer, trim_trailing_whitespace(&buf))?;
            }
            Ok(n) if n == MAX_LINE_BYTES => {
                forward(writer, &buf)?;
            }
            Ok(_) => {
                tracing::debug!(
                    pod = %target.pod,
                    container = %target.container,
                    bytes = buf.len(),
                    "dropping unterminated trailing fragment"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// One `write` per line; `write_all` would skip empty lines entirely.
fn forward(writer: &mut LoggregatorWriter, line: &[u8]) -> io::Result<()> {
    let n = writer.write(line)?;
    if n < line.len() {
        return Err(io::ErrorKind::WriteZero.into());
    }
    Ok(())
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures::stream::{self, StreamExt, TryStreamExt};

    use super::*;
    use crate::errors::AppError;
    use crate::loggregator::proto::Envelope;
    use crate::loggregator::{EnvelopeEmitter, LoggregatorAppMeta};

    #[derive(Default)]
    struct Collect(Mutex<Vec<Envelope>>);

    impl EnvelopeEmitter for Collect {
        fn emit(&self, envelope: Envelope) {
            self.0.lock().unwrap().push(envelope);
        }
    }

    impl Collect {
        fn payloads(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|e| String::from_utf8_lossy(e.log_payload().unwrap_or_default()).into_owned())
                .collect()
        }
    }

    /// Serves a fixed list of chunks, then either ends or fails.
    struct Chunks {
        chunks: Vec<&'static str>,
        fail_with: Option<io::ErrorKind>,
    }

    #[async_trait]
    impl LogSource for Chunks {
        async fn open(&self, _target: &TailTarget) -> AppResult<LogReader> {
            let mut items: Vec<io::Result<Vec<u8>>> =
                self.chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
            if let Some(kind) = self.fail_with {
                items.push(Err(io::Error::new(kind, "stream reset")));
            }
            Ok(Box::pin(stream::iter(items).into_async_read()))
        }
    }

    /// Never yields a byte.
    struct Silent;

    #[async_trait]
    impl LogSource for Silent {
        async fn open(&self, _target: &TailTarget) -> AppResult<LogReader> {
            let pending = stream::pending::<io::Result<Vec<u8>>>();
            Ok(Box::pin(pending.boxed().into_async_read()))
        }
    }

    fn target() -> TailTarget {
        TailTarget {
            namespace: "ns".into(),
            pod: "p".into(),
            container: "c".into(),
        }
    }

    fn writer(sink: &Arc<Collect>) -> LoggregatorWriter {
        let meta = LoggregatorAppMeta {
            container: "c".into(),
            ..Default::default()
        };
        LoggregatorWriter::new(meta, sink.clone())
    }

    #[tokio::test]
    async fn forwards_each_line_and_ends_cleanly() {
        let sink = Arc::new(Collect::default());
        let source = Chunks {
            chunks: vec!["hello wor", "ld  \r\n", "\nsecond\n", "partial"],
            fail_with: None,
        };

        tail(&source, &target(), &mut writer(&sink), &CancellationToken::new())
            .await
            .expect("end of stream is not an error");

        assert_eq!(sink.payloads(), vec!["hello world", "", "second"]);
    }

    #[tokio::test]
    async fn blank_lines_become_empty_envelopes() {
        let sink = Arc::new(Collect::default());
        let source = Chunks {
            chunks: vec!["a\n\nb\n"],
            fail_with: None,
        };

        tail(&source, &target(), &mut writer(&sink), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.payloads(), vec!["a", "", "b"]);
    }

    #[tokio::test]
    async fn overlong_line_is_split() {
        let sink = Arc::new(Collect::default());
        let mut line = "x".repeat(MAX_LINE_BYTES + 10);
        line.push('\n');
        let source = Chunks {
            chunks: vec![Box::leak(line.into_boxed_str())],
            fail_with: None,
        };

        tail(&source, &target(), &mut writer(&sink), &CancellationToken::new())
            .await
            .unwrap();

        let lens: Vec<usize> = sink.payloads().iter().map(String::len).collect();
        assert_eq!(lens, vec![MAX_LINE_BYTES, 10]);
    }

    #[tokio::test]
    async fn read_failure_is_reported() {
        let sink = Arc::new(Collect::default());
        let source = Chunks {
            chunks: vec!["one\n"],
            fail_with: Some(io::ErrorKind::ConnectionReset),
        };

        let err = tail(&source, &target(), &mut writer(&sink), &CancellationToken::new())
            .await
            .expect_err("reset must surface");

        assert!(matches!(err, AppError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
        assert_eq!(sink.payloads(), vec!["one"]);
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_pending_read() {
        let sink = Arc::new(Collect::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            let mut w = writer(&sink);
            async move { tail(&Silent, &target(), &mut w, &cancel).await }
        });

        tokio::task::yield_now().await;
        cancel.cancel();

        let res = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("tailer must stop promptly")
            .unwrap();
        assert!(res.is_ok());
        assert!(sink.payloads().is_empty());
    }

    #[test]
    fn trims_only_trailing_whitespace() {
        assert_eq!(trim_trailing_whitespace(b"  x \t\r\n"), b"  x");
        assert_eq!(trim_trailing_whitespace(b"\n"), b"");
    }
}
