// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Core foundational types and utilities for the Meridian trading engine.
//!
//! The *core* crate is designed to be lightweight, efficient, and to provide zero-cost abstractions
//! wherever possible. It supplies the essential building blocks used across the Meridian
//! ecosystem, including:
//!
//! - Time handling and atomic clock functionality.
//! - UUID generation and management.
//! - Correctness validation functions.
//!
//! # Platform
//!
//! Meridian is a high-performance algorithmic trading platform, providing quantitative traders
//! with the ability to backtest portfolios of automated trading strategies on historical data
//! with an event-driven engine, and also deploy those same strategies live, with no code changes.
//!
//! The design, architecture, and implementation philosophy prioritizes software correctness and
//! safety at the highest level, with the aim of supporting mission-critical trading system
//! backtesting and live deployment workloads.

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod consts;
pub mod correctness;
pub mod datetime;
pub mod nanos;
pub mod time;
pub mod uuid;

// Re-exports
pub use crate::{consts::MUTEX_POISONED, nanos::UnixNanos, time::AtomicTime, uuid::UUID4};
