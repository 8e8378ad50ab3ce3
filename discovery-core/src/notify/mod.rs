//! Change notification plumbing.
//!
//! - [`doorbell`]: the signal-safe wait primitive.
//! - [`event`]: the `REGISTRY_CHANGED` event that waiters attach to.
//! - [`notifier`]: blocking waits with a one-way unblock valve.
//! - [`listener`]: the background thread behind callback mode.

pub mod doorbell;
pub mod event;
pub mod listener;
pub mod notifier;

pub use doorbell::{Doorbell, DoorbellRinger, RingResult};
pub use event::{Attachment, ChangeEvent};
pub use listener::Listener;
pub use notifier::{ChangeNotifier, UnblockHandle};
