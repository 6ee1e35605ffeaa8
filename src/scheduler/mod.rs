//! Send-queue scheduling and safety-limit enforcement.
//!
//! This module contains the full dispatch pipeline that drains the send
//! queue: deciding what is eligible to go out, claiming items so that
//! concurrent workers never double-send, handing them to the provider,
//! and recording what happened.
//!
//! # Architecture Overview
//!
//! ## Core Components
//!
//! - **`dispatcher`**: Orchestrates scheduling passes. Runs reconciliation,
//!   batch selection and per-item dispatch sequentially and reports a
//!   summary per pass. Also hosts the background loop spawned at liftoff.
//!
//! - **`selector`**: Builds the dispatch batch: due pending items whose
//!   campaign and account are active, inside the account-local send
//!   window, under the per-account per-channel daily ceiling, and not
//!   blocked by suppression, cooldown or an in-batch duplicate.
//!
//! - **`executor`**: Drives a single item through claim, policy re-check,
//!   jitter delay, the provider call, and the terminal (or retryable)
//!   status transition. Every attempt leaves an audit trail.
//!
//! - **`queue`**: Storage operations on `send_queue`: enqueue, the atomic
//!   claim transaction, and guarded status transitions keyed on the
//!   status a row is expected to still have.
//!
//! - **`capacity`**: Per-account per-channel daily-limit resolution and
//!   usage counting over the account's local calendar day.
//!
//! - **`window`**: Account-local send-window arithmetic: hour and weekday
//!   gating plus UTC bounds of a local day, DST transitions included.
//!
//! - **`planner`**: Assigns spaced `scheduled_at` slots when contacts are
//!   admitted into a campaign so a day's quota is not burned in one burst.
//!
//! - **`history` / `audit`**: Append-only outreach history (drives the
//!   cross-campaign cooldown) and the per-attempt audit trail.
//!
//! - **`reconcile`**: Resolves items stranded in `processing` after an
//!   ambiguous provider outcome by consulting the provider's sent
//!   history before deciding between `sent` and a retry.
//!
//! ## Dispatch Flow
//!
//! 1. **Reconcile**: Items stuck in `processing` longer than the
//!    threshold are matched against provider sent history.
//! 2. **Select**: A bounded batch of eligible pending items is chosen,
//!    oldest `scheduled_at` first.
//! 3. **Claim**: Each item is claimed `pending` to `processing` inside a
//!    transaction that re-checks capacity under an account-row lock.
//! 4. **Send**: After a jitter delay, exactly one provider call is made.
//! 5. **Record**: The outcome transition, outreach history and audit
//!    events are written. Ambiguous outcomes stay `processing` for the
//!    reconciler; they are never retried blind.

pub mod audit;
pub mod capacity;
pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod history;
pub mod planner;
pub mod queue;
pub mod reconcile;
pub mod selector;
pub mod window;

pub use config::{PlannerConfig, SchedulerConfig, WindowConfig};
pub use dispatcher::{Dispatcher, PassSummary};
