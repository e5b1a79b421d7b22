//! # Modkit Event System Errors
use crate::event::EventId;

#[derive(Debug, thiserror::Error)]
pub enum EventSystemError {
    #[error("No event handler registered with ID {id}")]
    HandlerNotFound { id: EventId },
}
