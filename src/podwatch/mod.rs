pub mod reconciler;
pub mod registry;
pub mod watcher;

pub use reconciler::Reconciler;
pub use registry::{Container, ContainerRegistry};
