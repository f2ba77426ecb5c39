//! `labsim` - Guided experiment state machine for virtual science labs
//!
//! A learner moves through a fixed sequence of phases (intro, supply
//! collection, setup, timed trials, results, quiz, completion). This
//! library provides the phase controller, the guards between phases, timed
//! trial simulation on an injectable clock, quiz scoring and first-claim
//! reward granting against a progress store.

pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod narrator;
pub mod observability;
pub mod outcome;
pub mod store;
