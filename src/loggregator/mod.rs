pub mod envelope;
pub mod ingress;
pub mod proto;
pub mod stdout;
pub mod writer;

pub use envelope::LoggregatorAppMeta;
pub use ingress::{EnvelopeEmitter, IngressClient};
pub use writer::LoggregatorWriter;
