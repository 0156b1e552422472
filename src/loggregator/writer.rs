use std::io;
use std::sync::Arc;

use crate::loggregator::envelope::LoggregatorAppMeta;
use crate::loggregator::ingress::EnvelopeEmitter;

/// Per-container writer: every `write` becomes one envelope tagged with this
/// container's metadata.
#[derive(Clone)]
pub struct LoggregatorWriter {
    meta: Arc<LoggregatorAppMeta>,
    emitter: Arc<dyn EnvelopeEmitter>,
}

impl LoggregatorWriter {
    pub fn new(meta: LoggregatorAppMeta, emitter: Arc<dyn EnvelopeEmitter>) -> Self {
        Self {
            meta: Arc::new(meta),
            emitter,
        }
    }
}

impl io::Write for LoggregatorWriter {
    /// Hands the line to the emitter; the emitter owns batching and retries,
    /// so the whole input always counts as written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.emitter.emit(self.meta.envelope(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
