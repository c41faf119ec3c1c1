//! Gateway: the webhook endpoint the provider calls synchronously.
//!
//! GET answers the ownership challenge; POST delivers one inbound message and gets the
//! reply in the response body. Every request leaves one audit entry.

mod audit;
mod server;

pub use audit::{AuditEntry, AuditLog, Outcome};
pub use server::{
    handle_challenge, handle_delivery, router, run_gateway, ChallengeQuery, GatewayError,
    GatewayState,
};
