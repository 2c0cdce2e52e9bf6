//! Glue service for a Twilio Studio flow that parks callers in a holding
//! conference while a (simulated) long-running operation runs, then ends
//! the conference so the flow can fetch the result.

pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod simulator;

pub use config::BridgeConfig;
pub use error::ProviderError;
pub use provider::{Conference, ConferenceProvider, ConferenceStatus, TwilioClient};
pub use simulator::{schedule_completion, CompletionOutcome, CompletionTask, DelayRange};
