//! # Crossbook
//!
//! A deterministic continuous double-auction matching engine for a
//! single-asset limit order book.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: one thread owns the book exclusively (no locks)
//! - **Strict Ordering**: responses appear in exact causal order
//! - **Arena Allocation**: 64-byte aligned nodes, 32-bit indices, no heap
//!   allocation in the hot path
//! - **Tree Book**: price levels live in a left-leaning red-black tree;
//!   O(log k) insert, O(log k) best-price pop, O(1) cancel by guid
//!
//! ## Architecture
//!
//! ```text
//! [Caller] --> Matcher::submit --> [Book: LLRB trees + guid index]
//!                    |
//!             [Response Ring (SPSC)] --> [Consumer]
//! ```

pub mod arena;
pub mod book;
pub mod config;
pub mod guidstore;
pub mod matcher;
pub mod order;
pub mod ring;
pub mod tree;

// Re-exports for convenience
pub use arena::{Arena, ArenaIndex, OrderNode, NIL};
pub use book::Book;
pub use config::{Config, ConfigError};
pub use guidstore::GuidStore;
pub use matcher::{midpoint, Matcher, SubmitError};
pub use order::{Kind, Order, Response, ResponseKind, Side};
pub use ring::{response_ring, ResponseReader, ResponseWriter, RingFull};
pub use tree::Tree;
