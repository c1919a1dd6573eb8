//! Refresh scheduler and live broadcast hub.
//!
//! [`RefreshScheduler`] re-executes stored templates on their own cadence,
//! keeps the latest outcome per template in a [`ResultCache`] and hands every
//! fresh result to the [`BroadcastHub`], which fans it out to all members of
//! the [`SubscriberRegistry`]. [`HealthMonitor`] probes subscribers on its own
//! interval and purges the ones that stopped answering.
//!
//! The template store, query executor and subscriber transport are supplied
//! by the caller through the traits in [`traits`].

pub mod cache;
pub mod health;
pub mod hub;
pub mod lifecycle;
pub mod message;
pub mod registry;
pub mod scheduler;
pub mod traits;

pub use cache::ResultCache;
pub use health::{HealthMonitor, ProbeReport};
pub use hub::{BroadcastHub, BroadcastReport};
pub use lifecycle::LoopState;
pub use message::{ClientMessage, LiveMessage, ResultBody};
pub use registry::{FanOut, SubscriberRegistry};
pub use scheduler::{CycleReport, RefreshScheduler};
pub use traits::{QueryExecutor, Subscriber, SubscriberId, TemplateStore};
