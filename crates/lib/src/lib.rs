//! slackgw core library — Slack event gateway for the agent backend:
//! signature verification, event dedup, normalization, forwarding, and
//! response posting.

pub mod cache;
pub mod config;
pub mod event;
pub mod forward;
pub mod gateway;
pub mod normalize;
pub mod protocol;
pub mod slack;
pub mod verify;
