use std::io::{self, Write};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::loggregator::ingress::EnvelopeEmitter;
use crate::loggregator::proto::Envelope;

/// Prints envelopes as NDJSON instead of shipping them. Used by dev mode.
#[derive(Debug, Default)]
pub struct StdoutEmitter;

impl StdoutEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EnvelopeEmitter for StdoutEmitter {
    fn emit(&self, envelope: Envelope) {
        let line = format_json(&envelope);

        let stdout = io::stdout();
        let mut out = stdout.lock();
        // A closed stdout (e.g. `| head`) must not kill the tailers.
        let _ = out
            .write_all(line.as_bytes())
            .and_then(|_| out.write_all(b"\n"));
    }
}

pub fn format_json(env: &Envelope) -> String {
    let payload = env
        .log_payload()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .unwrap_or_default();

    serde_json::json!({
        "timestamp": env.timestamp,
        "time": format_ts(env.timestamp),
        "source_id": env.source_id,
        "instance_id": env.instance_id,
        "tags": env.tags,
        "payload": payload,
    })
    .to_string()
}

fn format_ts(nanos: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_default()
}
