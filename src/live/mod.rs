//! Live acquisition core.
//!
//! Background contexts that talk to hardware and forward results to the single presentation
//! sink:
//!
//! - [`worker::FrameWorker`]: grabs frames from one camera
//! - [`poller::StagePoller`]: samples every stage position periodically
//! - [`session::SessionController`]: starts, stops and tears down live and snapshot sessions
//! - [`properties::PropertyService`]: applies operator property edits
//!
//! All of them share one [`LockRegistry`](crate::locks::LockRegistry) and send through one
//! [`events::EventSender`].

pub mod events;
pub mod poller;
pub mod properties;
pub mod session;
pub mod worker;

pub use events::{event_channel, ConsoleEvent, EventReceiver, EventSender};
pub use poller::{PollSummary, PollerHandle, StagePoller};
pub use properties::{PropertyCommand, PropertyService, PropertyServiceHandle};
pub use session::{SessionController, SessionOutcome, SessionReport, SessionState};
pub use worker::{FrameWorker, WorkerExit, WorkerOutcome};
