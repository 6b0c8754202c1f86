//! Database query functions organized by domain.

pub mod accounts;
pub mod checkpoints;
pub mod events;
pub mod nonces;
pub mod pools;
pub mod withdrawals;
