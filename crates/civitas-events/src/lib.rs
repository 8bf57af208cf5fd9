//! Ordered event bus for the Civitas simulation.
//!
//! Every notable thing that happens in the simulation (an entity acting, a
//! resource running short, a tick completing) is published here as an
//! immutable [`Event`]. The bus gives three guarantees:
//!
//! - **Ordering** -- sequence numbers start at 1 and are strictly
//!   increasing and gap-free for the lifetime of the bus.
//! - **Tick-synchronous delivery** -- events are staged while a tick runs
//!   and handed to subscribers by [`EventBus::flush`], which the engine
//!   calls before the next tick may begin.
//! - **At-least-once** -- a subscription receives every committed event of
//!   its kind exactly once per process lifetime, including the history
//!   committed before it subscribed.
//!
//! A rolled-back tick calls [`EventBus::discard_pending`]: its staged events
//! vanish and their sequence numbers are reused, so the log stays gap-free.

pub mod bus;
pub mod subscription;

pub use bus::EventBus;
pub use subscription::Subscription;

#[doc(no_inline)]
pub use civitas_types::{Event, EventKind, NewEvent};
