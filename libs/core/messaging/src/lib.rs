//! Broker-agnostic processing contract.
//!
//! This library provides the pieces shared between a broker adapter and the
//! domain logic it drives:
//! - **Error taxonomy**: [`ErrorKind`] and the classified [`ProcessingError`]
//! - **Processor**: the async [`Processor`] trait over raw message bodies
//! - **Acknowledgment policy**: the pure [`AckPolicy::decide`] mapping from
//!   outcome to [`AckAction`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  bytes   ┌─────────────┐  Result<(), ProcessingError>
//! │ amqp-worker  │─────────▶│  Processor  │──────────────┐
//! │ (consumer)   │          │ (your code) │              │
//! └──────▲───────┘          └─────────────┘              ▼
//!        │                                        ┌─────────────┐
//!        └──────── Ack / Requeue / DeadLetter ────│  AckPolicy  │
//!                                                 └─────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use messaging::{AckAction, AckPolicy, Processor};
//!
//! let outcome = processor.process(&delivery.data).await;
//! match AckPolicy::new().decide(&outcome, redeliveries) {
//!     AckAction::Ack => { /* basic.ack */ }
//!     AckAction::Requeue => { /* basic.nack requeue=true */ }
//!     AckAction::DeadLetter { kind, description } => { /* publish + ack */ }
//! }
//! ```

mod error;
mod policy;
mod processor;

pub use error::{ErrorKind, ProcessingError};
pub use policy::{AckAction, AckPolicy};
pub use processor::{FailingProcessor, NoOpProcessor, Processor};
