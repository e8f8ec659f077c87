//! The orchestrator ties the pool, the session stores, the crypto service,
//! and the browser layer together behind the service's public operations.
//!
//! Two sampling families exist: browser sampling drives a pooled container
//! through a network-capture script, module sampling signs direct API calls
//! with the bound [`AuthModules`] implementation and never touches the pool.

mod modules;
mod orchestrator;
mod samplers;

pub use modules::{AuthModules, PlainRequestSigner, SampleKind};
pub use orchestrator::{
    AuthPollResult, BrowserSampleResult, HealthSnapshot, ModuleSampleResult, Orchestrator,
    OrchestratorBuilder,
};
pub use samplers::{BrowserSampler, FeedSampler, HistorySampler};
