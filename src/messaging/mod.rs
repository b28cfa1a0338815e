/// Messaging module for engine telemetry
///
/// Every playback attempt, arbitration decision and lifecycle change is published as
/// an [`Event`] on the [`EventBus`]. Hosts subscribe to forward telemetry, drive
/// accessibility announcements, or inspect behaviour in tests.
///
/// ```text
/// ┌──────────────┐   publish    ┌───────────┐   try_send   ┌─────────────┐
/// │ Orchestrator │ ───────────> │ Event Bus │ ───────────> │ Subscribers │
/// │ Arbiter, ... │              │           │              │ (telemetry, │
/// └──────────────┘              └───────────┘              │  a11y, UI)  │
///                                                           └─────────────┘
/// ```
pub mod bus;
pub mod events;

pub use bus::{EventBus, SubscriberId};
pub use events::{Event, PlaybackMethod, PlaybackTelemetry};
