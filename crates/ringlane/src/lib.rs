//! Ringlane - Drop-on-Full Multi-Lane Channel
//!
//! A fixed-capacity channel for producers that must never wait. The channel is
//! split into lanes; every producing thread is pinned to one lane so that
//! unrelated threads rarely touch the same cache lines. A single consumer
//! drains the lanes round-robin.
//!
//! # Key Properties
//!
//! - `offer` is one non-blocking insert attempt; a full lane drops the item
//!   and bumps a monotonic drop counter
//! - Memory is bounded by `lanes × lane_capacity`, fixed at construction
//! - FIFO within a lane, no ordering across lanes
//! - Single consumer enforced by a non-cloneable [`Consumer`] handle
//!
//! # Example
//!
//! ```
//! use ringlane::{Channel, Config};
//!
//! let channel = Channel::<u64>::new(Config::new(2, 3, true)).unwrap();
//! let mut consumer = channel.consumer().unwrap();
//!
//! assert!(channel.offer_to(0, 1));
//! assert!(channel.offer_to(0, 2));
//! assert!(channel.offer_to(0, 3));
//! assert!(!channel.offer_to(0, 4)); // lane full, dropped
//! assert_eq!(channel.dropped_count(), 1);
//!
//! let batch = consumer.drain(10);
//! assert_eq!(batch, vec![1, 2, 3]);
//! ```

mod channel;
mod config;
mod invariants;
mod lane;
mod metrics;

pub use channel::{Channel, ChannelError, Consumer, OfferOutcome};
pub use config::{Config, ConfigError};
pub use metrics::MetricsSnapshot;
