//! # permfsm-feed
//!
//! Event feed for permfsm.
//!
//! Machines publish their events through a [`MachineSink`]; subscribers
//! receive them per machine or feed-wide with filters, and a
//! [`TransitionProjection`] mirrors the transition stream into one record per
//! machine.

pub mod error;
pub mod feed;
pub mod projection;

pub use error::FeedError;
pub use feed::{
    EventFeed, EventFilter, FeedEvent, FeedReceiver, MachineSink, Subscription, SubscriptionType,
};
pub use projection::{ProjectedMachine, TransitionProjection};
