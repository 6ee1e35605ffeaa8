//! Messaging provider integration.
//!
//! A thin HTTP client over the provider's REST API: one send endpoint
//! per channel (`POST /emails`, `POST /chats`, `POST /users/invite`)
//! and the sent-history listings used for reconciliation. Failures are
//! classified into the retry taxonomy the executor acts on.

pub mod client;
pub mod config;
pub mod error;

pub use client::{ProviderClient, SendReceipt, SentRecord};
pub use config::ProviderConfig;
pub use error::{ErrorClass, ProviderError};
