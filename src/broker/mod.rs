//! The broker engine: resource table, event translation, the actor loop and
//! the fork protocol.

pub mod client;
pub mod core;
pub mod error;
pub mod event;
pub mod fork;
pub mod table;
pub mod translator;

pub use client::BrokerClient;
pub use core::{Broker, BrokerBehavior, BrokerContext, BrokerMsg, BrokerState, Response};
pub use error::BrokerError;
pub use event::IoEvent;
pub use table::{CloseOutcome, ResourceTable};
