pub mod broker;
pub mod config;
pub mod connector;
pub mod destination;
pub mod error;
pub mod record;
pub mod source;

pub mod kafka;

pub use crate::config::Config;
pub use crate::connector::{specification, Destination, Source, Specification};
pub use crate::destination::{TopicDestination, WriteOutcome};
pub use crate::error::{Error, Result};
pub use crate::record::Record;
pub use crate::source::TopicSource;
