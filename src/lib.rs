//! Online planning for partially observable decision problems.
//!
//! Provides a flat POMCP planner and a hierarchical planner that searches
//! over a task graph of macro-actions, with particle-filter belief states
//! and convergence-based subtask caching.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::collapsible_if)]

pub mod planning;
pub mod simulation;
pub mod ui;
