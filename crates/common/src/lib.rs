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

//! Common componentry for the Meridian trading engine.
//!
//! The `meridian-common` crate provides the clock and timer machinery shared between the
//! backtest and live deployments of the system. Strategies register alerts and periodic
//! timers against a [`clock::Clock`], and the same strategy code runs unchanged against the
//! deterministic [`clock::TestClock`] in a backtest and the [`clock::LiveClock`] in production.
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
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod clock;
pub mod runtime;
pub mod testing;
pub mod timer;
