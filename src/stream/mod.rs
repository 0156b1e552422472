pub mod dev;
pub mod kube;
pub mod tail;

pub use tail::{tail, LogReader, LogSource, TailTarget};
