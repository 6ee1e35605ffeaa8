//! HTTP route handlers grouped by resource domain.
//!
//! Each submodule corresponds to a logical area of the API
//! (queue items, campaigns, dispatch administration) and exposes typed
//! Rocket handlers annotated with `#[openapi]` so `rocket_okapi` can
//! derive an OpenAPI document automatically.

pub mod admin;
pub mod campaigns;
pub mod health;
pub mod queue;
