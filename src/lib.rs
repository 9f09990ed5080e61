//! Feed ingestion, scoring and once-only delivery.
//!
//! A [`pipeline::Pipeline`] cycle fetches every enabled feed concurrently,
//! keeps fresh articles, scores and ranks them per category, drops links
//! already recorded in the notification history, hands the rest to a
//! [`delivery::Deliver`] collaborator and records what was delivered.

pub mod analysis;
pub mod article;
pub mod config;
pub mod delivery;
pub mod feed;
pub mod pipeline;
pub mod storage;
pub mod util;
