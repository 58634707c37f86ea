//! markctl - conversational grading frontend
//!
//! Wires the intent router, the session state machine, and the handler
//! dispatch over the LMS gateway and LLM capabilities from mark_common.

pub mod dispatch;
pub mod intent_router;
pub mod logging;
pub mod repl;
pub mod session;
