//! Runtime pieces for the `treevirt` crate.
//!
//! `treevirt` is synchronous and UI-agnostic. This crate adds what an
//! interactive host needs around it:
//!
//! - [`OperationQueue`]: mutating operations run one at a time off the
//!   caller's thread, with supersession through [`CancellationToken`]s
//! - [`ViewportScheduler`]: visible index ranges turned into bounded,
//!   cancellable page fetches against a [`PagingProvider`]
//! - [`Grid`]: a thread-safe façade over a projector and a layout estimator,
//!   raising [`GridEvent`]s through a [`Dispatcher`]
//!
//! Everything async runs on a tokio runtime handed in by the host.
#![forbid(unsafe_code)]

mod cancel;
mod dispatcher;
mod grid;
mod metrics;
mod provider;
mod queue;
mod scheduler;

#[cfg(test)]
mod tests;

pub use cancel::CancellationToken;
pub use dispatcher::{
    Dispatcher, InlineDispatcher, QueuedDispatcher, SubscriberId, Subscribers, Subscription, Task,
    dispatch,
};
pub use grid::{Grid, GridEvent};
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use provider::{InvalidationKind, PageResult, PagingProvider, ProviderError};
pub use queue::{OperationHandle, OperationOutcome, OperationQueue};
pub use scheduler::{SchedulerEvent, SchedulerSettings, ViewportRequest, ViewportScheduler};
