//! Services are the pluggable backends of the HTTP front end. The server
//! drives their lifecycle; handlers look them up by name and downcast to
//! the concrete type they need.

use std::any::Any;
use std::collections::BTreeMap;

pub trait Service: Send {
    /// Called once before the server starts accepting connections.
    fn initialize(&mut self) -> anyhow::Result<()>;

    /// Called on every timer tick of the server loop.
    fn tick(&mut self);

    /// Called once during server shutdown.
    fn shutdown(&mut self);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Registration table of named services, immutable once the server runs.
pub type ServiceMap = BTreeMap<String, Box<dyn Service>>;
