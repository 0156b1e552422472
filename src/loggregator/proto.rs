//! Loggregator v2 wire messages (subset of `envelope.proto` and
//! `ingress.proto` from `loggregator-api`), declared with prost derives so no
//! protoc step is needed at build time.

use std::collections::HashMap;

/// Full method path of the unary batch RPC on `loggregator.v2.Ingress`.
pub const INGRESS_SEND_PATH: &str = "/loggregator.v2.Ingress/Send";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(string, tag = "2")]
    pub source_id: String,
    #[prost(string, tag = "8")]
    pub instance_id: String,
    #[prost(map = "string, string", tag = "9")]
    pub tags: HashMap<String, String>,
    #[prost(oneof = "envelope::Message", tags = "4")]
    pub message: Option<envelope::Message>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "4")]
        Log(super::Log),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Log {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    #[prost(enumeration = "log::Type", tag = "2")]
    pub r#type: i32,
}

pub mod log {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Out = 0,
        Err = 1,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnvelopeBatch {
    #[prost(message, repeated, tag = "1")]
    pub batch: Vec<Envelope>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SendResponse {}

impl Envelope {
    /// Payload of a log envelope, `None` for any other kind.
    pub fn log_payload(&self) -> Option<&[u8]> {
        match &self.message {
            Some(envelope::Message::Log(log)) => Some(&log.payload),
            None => None,
        }
    }
}
