//! # Session Management
//!
//! Owns the broker session and its lifecycle. Callers issue commands from any
//! thread; every outcome comes back as exactly one [`Event`], delivered to
//! all registered observers in sequence order.
//!
//! ```text
//! session/
//! ├── command.rs   - Command values accepted by the manager
//! ├── error.rs     - Error taxonomy reported through events
//! ├── event.rs     - Event, EventKind and Operation
//! ├── manager.rs   - State machine, dispatch and emission
//! ├── observer.rs  - Observer trait and channel observer
//! └── state.rs     - Session and SessionState
//! ```
//!
//! ## Guarantees
//!
//! - A command rejected in the wrong state never reaches the adapter and
//!   never changes the session; it emits one locally built event.
//! - Each adapter completion, inbound message and link loss yields exactly
//!   one event.
//! - Sequence numbers strictly increase in emission order.
//! - The manager imposes no timeouts. An adapter that never completes a call
//!   leaves that command without a terminal event.

pub mod command;
pub mod error;
pub mod event;
pub mod manager;
pub mod observer;
pub mod state;

pub use command::Command;
pub use error::SessionError;
pub use event::{Event, EventKind, Operation};
pub use manager::SessionManager;
pub use observer::{ChannelObserver, Observer};
pub use state::{Session, SessionState};
