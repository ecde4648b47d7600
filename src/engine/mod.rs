//! Core engine: offer tracking, realized profit, and opportunity ranking.

pub mod ledger;
pub mod opportunities;
pub mod tracker;
