pub mod outbound_message;
pub mod webhook_attempt;
pub mod webhook_event;
