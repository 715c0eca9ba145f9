//! Integration test suite for murmur.
//!
//! These tests drive the scheduler end to end against an in-memory store,
//! with scripted continuations standing in for the language model and
//! procedural selfies or hand-filled channels standing in for image synthesis.
//!
//! # Test Categories
//!
//! - `conversation_e2e`: publication order, writing flags, selfies
//! - `runs`: run rotation, invalid generations, run budgets
//! - `images`: image channel starvation and producer failure
//! - `replay`: recorded conversations published again
//! - `lifecycle`: cancellation and upstream failures
//! - `pacing`: read, write and run pauses with real timing

mod fixtures;

mod conversation_e2e;
mod images;
mod lifecycle;
mod replay;
