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

//! Real-time and static `Clock` implementations.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    ops::Deref,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use meridian_core::{
    AtomicTime, MUTEX_POISONED, UUID4, UnixNanos,
    correctness::{check_positive_u64, check_predicate_true, check_valid_string},
    time::get_atomic_clock_realtime,
};
use ustr::Ustr;

use crate::timer::{
    LiveTimer, TestTimer, TimeEvent, TimeEventCallback, TimeEventHandler, TimerTrampoline,
    create_valid_interval,
};

/// Represents a type of clock.
///
/// A clock is a registry of labeled timers together with a dispatcher of the
/// time events those timers produce. Timer labels are unique within a single
/// clock instance; registering a duplicate label is an error.
///
/// # Notes
///
/// An active timer is one which has not expired (`timer.is_expired() == false`).
pub trait Clock: Debug {
    /// Returns the current date and time as a timezone-aware `DateTime<UTC>`.
    fn utc_now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp_ns().as_i64())
    }

    /// Returns the current UNIX timestamp in nanoseconds (ns).
    fn timestamp_ns(&self) -> UnixNanos;

    /// Returns the current UNIX timestamp in microseconds (μs).
    fn timestamp_us(&self) -> u64;

    /// Returns the current UNIX timestamp in milliseconds (ms).
    fn timestamp_ms(&self) -> u64;

    /// Returns the current UNIX timestamp in seconds.
    fn timestamp(&self) -> f64;

    /// Returns the duration elapsed since the given UNIX timestamp `ts_ns`.
    ///
    /// A timestamp in the future yields a zero duration.
    fn elapsed_since(&self, ts_ns: UnixNanos) -> Duration {
        Duration::from_nanos(self.timestamp_ns().saturating_sub(ts_ns.as_u64()))
    }

    /// Returns whether this is a deterministic test clock (as opposed to a
    /// real-time clock driven by the operating system).
    fn is_test_clock(&self) -> bool;

    /// Returns the names of active timers in the clock.
    fn timer_names(&self) -> Vec<Ustr>;

    /// Returns the count of active timers in the clock.
    fn timer_count(&self) -> usize;

    /// If a timer with the `name` exists.
    fn timer_exists(&self, name: &Ustr) -> bool;

    /// Returns whether the clock has any active timers.
    fn has_timers(&self) -> bool {
        self.timer_count() > 0
    }

    /// Returns the next time at which the timer `name` is due.
    ///
    /// If the timer doesn't exist `None` is returned.
    fn next_time_ns(&self, name: &str) -> Option<UnixNanos>;

    /// Returns the earliest next fire time across all active timers.
    ///
    /// If the clock has no active timers `None` is returned.
    fn next_event_time_ns(&self) -> Option<UnixNanos>;

    /// Returns the earliest next fire time across all active timers as a
    /// timezone-aware `DateTime<UTC>`.
    fn next_event_time(&self) -> Option<DateTime<Utc>> {
        self.next_event_time_ns().map(|ts| ts.to_datetime_utc())
    }

    /// Register a default event handler for the clock. If a timer
    /// is set without its own handler, then this handler is used.
    fn register_default_handler(&mut self, callback: TimeEventCallback);

    /// Get handler for [`TimeEvent`].
    ///
    /// # Panics
    ///
    /// Panics if the event does not have an associated handler and no default
    /// handler is registered.
    fn get_handler(&self, event: TimeEvent) -> TimeEventHandler;

    /// Set a timer to alert at the specified time.
    ///
    /// See [`Clock::set_time_alert_ns`].
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is invalid or already registered, if
    /// `alert_time` is in the past, or if no handler is available.
    fn set_time_alert(
        &mut self,
        name: &str,
        alert_time: DateTime<Utc>,
        callback: Option<TimeEventCallback>,
    ) -> anyhow::Result<()> {
        self.set_time_alert_ns(name, alert_time.into(), callback)
    }

    /// Set a timer to alert at the specified time.
    ///
    /// The alert fires exactly once with an event timestamp of `alert_time_ns`.
    /// An alert time equal to the current time is accepted and fires at the
    /// current time; an earlier alert time is rejected.
    ///
    /// # Callback
    ///
    /// - `callback`: Some, then the callback handles the time event.
    /// - `callback`: None, then the clock's default handler is used.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is invalid or already registered, if
    /// `alert_time_ns` is earlier than now, or if no handler is available.
    fn set_time_alert_ns(
        &mut self,
        name: &str,
        alert_time_ns: UnixNanos,
        callback: Option<TimeEventCallback>,
    ) -> anyhow::Result<()>;

    /// Set a timer to fire time events at every interval between start and stop time.
    ///
    /// See [`Clock::set_timer_ns`].
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is invalid or already registered, if
    /// `interval` is not positive, if the stop time is inconsistent with the
    /// start time, or if no handler is available.
    fn set_timer(
        &mut self,
        name: &str,
        interval: Duration,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
        callback: Option<TimeEventCallback>,
    ) -> anyhow::Result<()> {
        self.set_timer_ns(
            name,
            interval.as_nanos() as u64,
            start_time.map(UnixNanos::from),
            stop_time.map(UnixNanos::from),
            callback,
        )
    }

    /// Set a timer to fire time events at every interval between start and stop time.
    ///
    /// The first fire is at `start_time + interval`; subsequent fires follow at
    /// every interval until the optional stop time, after which the timer
    /// expires. No event is ever emitted with a timestamp beyond the stop time.
    ///
    /// # Start Time
    ///
    /// - `None` or `Some(0)`: Uses the current time as start time.
    /// - `Some(non_zero)`: Uses the specified timestamp as start time. A start
    ///   time in the past is accepted (supporting replay of historical
    ///   schedules); on a real-time clock an overdue first fire is clamped
    ///   forward to the current time.
    ///
    /// # Callback
    ///
    /// - `callback`: Some, then the callback handles the time events.
    /// - `callback`: None, then the clock's default handler is used.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is invalid or already registered, if
    /// `interval_ns` is not positive, if a stop time is not after the start
    /// time, if the first fire would land beyond the stop time, or if no
    /// handler is available.
    fn set_timer_ns(
        &mut self,
        name: &str,
        interval_ns: u64,
        start_time_ns: Option<UnixNanos>,
        stop_time_ns: Option<UnixNanos>,
        callback: Option<TimeEventCallback>,
    ) -> anyhow::Result<()>;

    /// Cancels the timer with `name`.
    ///
    /// An unknown `name` logs a warning and returns normally.
    fn cancel_timer(&mut self, name: &str);

    /// Cancels all timers.
    fn cancel_timers(&mut self);

    /// Resets the clock by clearing its internal state.
    fn reset(&mut self);
}

/// A static test clock.
///
/// Stores the current timestamp internally which can be advanced; all time
/// progression and event delivery happen inside the caller's invocation of
/// [`TestClock::advance_time`], so backtests replay deterministically.
///
/// # Threading
///
/// This clock is thread-affine; use it only from the thread that created it.
#[derive(Debug)]
pub struct TestClock {
    time: AtomicTime,
    // Use btree map to ensure stable ordering when scanning for timers in `advance_time`
    timers: BTreeMap<Ustr, TestTimer>,
    default_callback: Option<TimeEventCallback>,
    callbacks: HashMap<Ustr, TimeEventCallback>,
}

impl TestClock {
    /// Creates a new [`TestClock`] instance at the UNIX epoch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            time: AtomicTime::new(false, UnixNanos::default()),
            timers: BTreeMap::new(),
            default_callback: None,
            callbacks: HashMap::new(),
        }
    }

    /// Returns a reference to the internal timers for the clock.
    #[must_use]
    pub const fn get_timers(&self) -> &BTreeMap<Ustr, TestTimer> {
        &self.timers
    }

    /// Advances the internal clock to the specified `to_time_ns`, harvesting
    /// all due time events paired with their registered handlers.
    ///
    /// When at least one timer is due the internal clock is set to `to_time_ns`,
    /// expired timers are dropped together with their handlers, and the pairs
    /// are returned sorted ascending by event timestamp (name breaking ties).
    ///
    /// When no timer is due (`to_time_ns` earlier than the next event time, or
    /// no timers registered) the call is a no-op: it returns empty and leaves
    /// the internal time unchanged, so callers can probe ahead without
    /// committing the clock.
    ///
    /// # Warnings
    ///
    /// Logs a warning if >= 1,000,000 time events are allocated during advancement.
    ///
    /// # Panics
    ///
    /// Panics if `to_time_ns` is less than the current internal clock time,
    /// or if a registered timer has no associated handler.
    pub fn advance_time(&mut self, to_time_ns: UnixNanos) -> Vec<TimeEventHandler> {
        const WARN_TIME_EVENTS_THRESHOLD: usize = 1_000_000;

        let from_time_ns = self.time.get_time_ns();

        // Time should be non-decreasing
        assert!(
            to_time_ns >= from_time_ns,
            "`to_time_ns` {to_time_ns} was < `from_time_ns` {from_time_ns}"
        );

        match self.next_event_time_ns() {
            Some(next_time_ns) if to_time_ns >= next_time_ns => {}
            _ => return Vec::new(),
        }

        // Iterate and advance timers collecting events paired with their
        // handlers. Only retain alive timers and their handlers.
        let callbacks = &mut self.callbacks;
        let mut handlers: Vec<TimeEventHandler> = Vec::new();
        self.timers.retain(|name, timer| {
            let callback = callbacks
                .get(name)
                .cloned()
                .expect("Registered timer should have an associated handler");

            handlers.extend(
                timer
                    .advance(to_time_ns)
                    .map(|event| TimeEventHandler::new(event, callback.clone())),
            );

            if timer.is_expired() {
                callbacks.remove(name);
                false
            } else {
                true
            }
        });

        if handlers.len() >= WARN_TIME_EVENTS_THRESHOLD {
            log::warn!(
                "Allocated {} time events during clock advancement from {from_time_ns} to {to_time_ns}, \
                 consider stopping the timer between large time ranges with no data points",
                handlers.len(),
            );
        }

        self.time.set_time(to_time_ns);

        handlers.sort();
        handlers
    }
}

impl Default for TestClock {
    /// Creates a new default [`TestClock`] instance.
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestClock {
    type Target = AtomicTime;

    fn deref(&self) -> &Self::Target {
        &self.time
    }
}

impl Clock for TestClock {
    fn timestamp_ns(&self) -> UnixNanos {
        self.time.get_time_ns()
    }

    fn timestamp_us(&self) -> u64 {
        self.time.get_time_us()
    }

    fn timestamp_ms(&self) -> u64 {
        self.time.get_time_ms()
    }

    fn timestamp(&self) -> f64 {
        self.time.get_time()
    }

    fn is_test_clock(&self) -> bool {
        true
    }

    fn timer_names(&self) -> Vec<Ustr> {
        self.timers
            .iter()
            .filter(|(_, timer)| !timer.is_expired())
            .map(|(k, _)| *k)
            .collect()
    }

    fn timer_count(&self) -> usize {
        self.timers
            .iter()
            .filter(|(_, timer)| !timer.is_expired())
            .count()
    }

    fn timer_exists(&self, name: &Ustr) -> bool {
        self.timers.contains_key(name)
    }

    fn next_time_ns(&self, name: &str) -> Option<UnixNanos> {
        self.timers
            .get(&Ustr::from(name))
            .map(TestTimer::next_time_ns)
    }

    fn next_event_time_ns(&self) -> Option<UnixNanos> {
        self.timers
            .values()
            .filter(|timer| !timer.is_expired())
            .map(TestTimer::next_time_ns)
            .min()
    }

    fn register_default_handler(&mut self, callback: TimeEventCallback) {
        self.default_callback = Some(callback);
    }

    /// Returns the handler for the given `TimeEvent`.
    ///
    /// # Panics
    ///
    /// Panics if no event-specific or default callback has been registered for the event.
    fn get_handler(&self, event: TimeEvent) -> TimeEventHandler {
        let callback = self
            .callbacks
            .get(&event.name)
            .cloned()
            .or_else(|| self.default_callback.clone())
            .unwrap_or_else(|| panic!("Event '{}' should have associated handler", event.name));

        TimeEventHandler::new(event, callback)
    }

    fn set_time_alert_ns(
        &mut self,
        name: &str,
        alert_time_ns: UnixNanos,
        callback: Option<TimeEventCallback>,
    ) -> anyhow::Result<()> {
        check_valid_string(name, stringify!(name))?;

        let name = Ustr::from(name);

        if self.timer_exists(&name) {
            anyhow::bail!("Timer '{name}' already exists (labels are unique per clock)");
        }

        check_predicate_true(
            callback.is_some() | self.default_callback.is_some(),
            "No callbacks provided",
        )?;

        let ts_now = self.get_time_ns();

        if alert_time_ns < ts_now {
            anyhow::bail!(
                "Timer '{name}' alert time {} was in the past (current time is {})",
                alert_time_ns.to_rfc3339(),
                ts_now.to_rfc3339(),
            );
        }

        let callback = match callback {
            Some(callback) => callback,
            None => self
                .default_callback
                .clone()
                .expect("Default callback should exist"),
        };

        // Safe to calculate interval now that we've ensured alert_time_ns >= ts_now
        let interval_ns = create_valid_interval((alert_time_ns - ts_now).into());
        // When alert time equals current time, fire immediately
        let fire_immediately = alert_time_ns == ts_now;

        let timer = TestTimer::new(
            name,
            interval_ns,
            ts_now,
            Some(alert_time_ns),
            fire_immediately,
        );
        self.callbacks.insert(name, callback);
        self.timers.insert(name, timer);

        Ok(())
    }

    fn set_timer_ns(
        &mut self,
        name: &str,
        interval_ns: u64,
        start_time_ns: Option<UnixNanos>,
        stop_time_ns: Option<UnixNanos>,
        callback: Option<TimeEventCallback>,
    ) -> anyhow::Result<()> {
        check_valid_string(name, stringify!(name))?;
        check_positive_u64(interval_ns, stringify!(interval_ns))?;

        let name = Ustr::from(name);

        if self.timer_exists(&name) {
            anyhow::bail!("Timer '{name}' already exists (labels are unique per clock)");
        }

        check_predicate_true(
            callback.is_some() | self.default_callback.is_some(),
            "No callbacks provided",
        )?;

        let mut start_time_ns = start_time_ns.unwrap_or_default();
        if start_time_ns == 0 {
            // Zero start time indicates no explicit start; we use the current time
            start_time_ns = self.timestamp_ns();
        }

        if let Some(stop_time_ns) = stop_time_ns {
            if stop_time_ns <= start_time_ns {
                anyhow::bail!(
                    "Timer '{name}' stop time {} must be after start time {}",
                    stop_time_ns.to_rfc3339(),
                    start_time_ns.to_rfc3339(),
                );
            }
            if start_time_ns + interval_ns > stop_time_ns {
                anyhow::bail!(
                    "Timer '{name}' first fire at {} would be after stop time {}",
                    (start_time_ns + interval_ns).to_rfc3339(),
                    stop_time_ns.to_rfc3339(),
                );
            }
        }

        let callback = match callback {
            Some(callback) => callback,
            None => self
                .default_callback
                .clone()
                .expect("Default callback should exist"),
        };

        let interval_ns = create_valid_interval(interval_ns);

        let timer = TestTimer::new(name, interval_ns, start_time_ns, stop_time_ns, false);
        self.callbacks.insert(name, callback);
        self.timers.insert(name, timer);

        Ok(())
    }

    fn cancel_timer(&mut self, name: &str) {
        let name = Ustr::from(name);
        match self.timers.remove(&name) {
            Some(mut timer) => {
                timer.cancel();
                self.callbacks.remove(&name);
            }
            None => log::warn!("Timer '{name}' not found"),
        }
    }

    fn cancel_timers(&mut self) {
        for timer in self.timers.values_mut() {
            timer.cancel();
        }

        self.timers.clear();
        self.callbacks.clear();
    }

    fn reset(&mut self) {
        self.time = AtomicTime::new(false, UnixNanos::default());
        self.timers = BTreeMap::new();
        self.callbacks = HashMap::new();
    }
}

/// A real-time clock which uses system time.
///
/// Timestamps are guaranteed to be unique and monotonically increasing.
/// Each registered timer owns a delayed task on the shared Tokio runtime;
/// fired events are dispatched to their handlers from the runtime's threads
/// through clock-internal trampolines.
///
/// # Threading
///
/// The timer registry is shared with the runtime threads behind a single
/// mutex; registration, cancellation, and the fire-time trampolines all
/// serialize on it. User handlers always execute outside the lock so a
/// handler may freely schedule or cancel timers on the same clock.
#[derive(Debug)]
pub struct LiveClock {
    time: &'static AtomicTime,
    inner: Arc<Mutex<LiveClockInner>>,
}

#[derive(Debug)]
struct LiveClockInner {
    timers: HashMap<Ustr, LiveTimer>,
    default_callback: Option<TimeEventCallback>,
    callbacks: HashMap<Ustr, TimeEventCallback>,
}

impl LiveClock {
    /// Creates a new [`LiveClock`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            time: get_atomic_clock_realtime(),
            inner: Arc::new(Mutex::new(LiveClockInner {
                timers: HashMap::new(),
                default_callback: None,
                callbacks: HashMap::new(),
            })),
        }
    }

    fn one_shot_trampoline(&self) -> TimerTrampoline {
        let inner = Arc::downgrade(&self.inner);
        TimerTrampoline::from(move |name: Ustr, event_time_ns: UnixNanos| {
            Self::raise_time_event(&inner, name, event_time_ns);
        })
    }

    fn repeating_trampoline(&self) -> TimerTrampoline {
        let inner = Arc::downgrade(&self.inner);
        TimerTrampoline::from(move |name: Ustr, event_time_ns: UnixNanos| {
            Self::raise_time_event_repeating(&inner, name, event_time_ns);
        })
    }

    /// One-shot fire path: registry bookkeeping happens under the lock and
    /// precedes dispatch, so a panicking handler cannot leak the timer.
    fn raise_time_event(inner: &Weak<Mutex<LiveClockInner>>, name: Ustr, event_time_ns: UnixNanos) {
        let Some(inner) = inner.upgrade() else {
            return; // Clock already dropped
        };

        let handler = {
            let mut guard = inner.lock().expect(MUTEX_POISONED);

            // A cancellation which won the race has already removed the timer
            if guard.timers.remove(&name).is_none() {
                return;
            }

            let ts_init = get_atomic_clock_realtime().get_time_ns();
            let event = TimeEvent::new(name, UUID4::new(), event_time_ns, ts_init);

            guard
                .callbacks
                .remove(&name)
                .map(|callback| TimeEventHandler::new(event, callback))
        };

        // Dispatch outside the lock so the handler can schedule further timers
        if let Some(handler) = handler {
            handler.run();
        }
    }

    /// Repeating fire path: re-arms (or expires) the timer under the lock,
    /// then dispatches outside it.
    fn raise_time_event_repeating(
        inner: &Weak<Mutex<LiveClockInner>>,
        name: Ustr,
        event_time_ns: UnixNanos,
    ) {
        let Some(inner) = inner.upgrade() else {
            return; // Clock already dropped
        };

        let handler = {
            let mut guard = inner.lock().expect(MUTEX_POISONED);

            let Some(timer) = guard.timers.get_mut(&name) else {
                // A cancellation which won the race has already removed the timer
                return;
            };

            let clock = get_atomic_clock_realtime();
            let expired = timer
                .stop_time_ns
                .is_some_and(|stop_time_ns| event_time_ns >= stop_time_ns);

            if expired {
                guard.timers.remove(&name);
            } else {
                timer.iterate_next();
                timer.repeat(clock.get_time_ns());
            }

            let ts_init = clock.get_time_ns();
            let event = TimeEvent::new(name, UUID4::new(), event_time_ns, ts_init);

            let callback = if expired {
                guard.callbacks.remove(&name)
            } else {
                guard.callbacks.get(&name).cloned()
            };

            callback.map(|callback| TimeEventHandler::new(event, callback))
        };

        // Dispatch outside the lock so the handler can schedule further timers
        if let Some(handler) = handler {
            handler.run();
        }
    }
}

impl Default for LiveClock {
    /// Creates a new default [`LiveClock`] instance.
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LiveClock {
    /// Releases all timer tasks so no fires outlive the clock.
    fn drop(&mut self) {
        // Best-effort teardown; a poisoned lock means the process is already failing
        if let Ok(mut inner) = self.inner.lock() {
            for timer in inner.timers.values_mut() {
                timer.cancel();
            }
            inner.timers.clear();
            inner.callbacks.clear();
        }
    }
}

impl Deref for LiveClock {
    type Target = AtomicTime;

    fn deref(&self) -> &Self::Target {
        self.time
    }
}

impl Clock for LiveClock {
    fn timestamp_ns(&self) -> UnixNanos {
        self.time.get_time_ns()
    }

    fn timestamp_us(&self) -> u64 {
        self.time.get_time_us()
    }

    fn timestamp_ms(&self) -> u64 {
        self.time.get_time_ms()
    }

    fn timestamp(&self) -> f64 {
        self.time.get_time()
    }

    fn is_test_clock(&self) -> bool {
        false
    }

    fn timer_names(&self) -> Vec<Ustr> {
        let inner = self.inner.lock().expect(MUTEX_POISONED);
        inner
            .timers
            .iter()
            .filter(|(_, timer)| !timer.is_expired())
            .map(|(k, _)| *k)
            .collect()
    }

    fn timer_count(&self) -> usize {
        let inner = self.inner.lock().expect(MUTEX_POISONED);
        inner
            .timers
            .iter()
            .filter(|(_, timer)| !timer.is_expired())
            .count()
    }

    fn timer_exists(&self, name: &Ustr) -> bool {
        let inner = self.inner.lock().expect(MUTEX_POISONED);
        inner.timers.contains_key(name)
    }

    fn next_time_ns(&self, name: &str) -> Option<UnixNanos> {
        let inner = self.inner.lock().expect(MUTEX_POISONED);
        inner
            .timers
            .get(&Ustr::from(name))
            .map(LiveTimer::next_time_ns)
    }

    fn next_event_time_ns(&self) -> Option<UnixNanos> {
        let inner = self.inner.lock().expect(MUTEX_POISONED);
        inner
            .timers
            .values()
            .filter(|timer| !timer.is_expired())
            .map(LiveTimer::next_time_ns)
            .min()
    }

    fn register_default_handler(&mut self, callback: TimeEventCallback) {
        let mut inner = self.inner.lock().expect(MUTEX_POISONED);
        inner.default_callback = Some(callback);
    }

    /// Returns the handler for the given `TimeEvent`.
    ///
    /// # Panics
    ///
    /// Panics if no event-specific or default callback has been registered for the event.
    fn get_handler(&self, event: TimeEvent) -> TimeEventHandler {
        let inner = self.inner.lock().expect(MUTEX_POISONED);
        let callback = inner
            .callbacks
            .get(&event.name)
            .cloned()
            .or_else(|| inner.default_callback.clone())
            .unwrap_or_else(|| panic!("Event '{}' should have associated handler", event.name));

        TimeEventHandler::new(event, callback)
    }

    fn set_time_alert_ns(
        &mut self,
        name: &str,
        alert_time_ns: UnixNanos,
        callback: Option<TimeEventCallback>,
    ) -> anyhow::Result<()> {
        check_valid_string(name, stringify!(name))?;

        let name = Ustr::from(name);
        let trampoline = self.one_shot_trampoline();

        let mut inner = self.inner.lock().expect(MUTEX_POISONED);

        if inner.timers.contains_key(&name) {
            anyhow::bail!("Timer '{name}' already exists (labels are unique per clock)");
        }

        check_predicate_true(
            callback.is_some() | inner.default_callback.is_some(),
            "No callbacks provided",
        )?;

        let ts_now = self.get_time_ns();

        if alert_time_ns < ts_now {
            anyhow::bail!(
                "Timer '{name}' alert time {} was in the past (current time is {})",
                alert_time_ns.to_rfc3339(),
                ts_now.to_rfc3339(),
            );
        }

        let callback = match callback {
            Some(callback) => callback,
            None => inner
                .default_callback
                .clone()
                .expect("Default callback should exist"),
        };

        // Safe to calculate interval now that we've ensured alert_time_ns >= ts_now
        let interval_ns = create_valid_interval((alert_time_ns - ts_now).into());
        // When alert time equals current time, fire immediately
        let fire_immediately = alert_time_ns == ts_now;

        let mut timer = LiveTimer::new(
            name,
            interval_ns,
            ts_now,
            Some(alert_time_ns),
            fire_immediately,
            trampoline,
        );
        timer.start();

        inner.callbacks.insert(name, callback);
        inner.timers.insert(name, timer);

        Ok(())
    }

    fn set_timer_ns(
        &mut self,
        name: &str,
        interval_ns: u64,
        start_time_ns: Option<UnixNanos>,
        stop_time_ns: Option<UnixNanos>,
        callback: Option<TimeEventCallback>,
    ) -> anyhow::Result<()> {
        check_valid_string(name, stringify!(name))?;
        check_positive_u64(interval_ns, stringify!(interval_ns))?;

        let name = Ustr::from(name);
        let trampoline = self.repeating_trampoline();

        let mut inner = self.inner.lock().expect(MUTEX_POISONED);

        if inner.timers.contains_key(&name) {
            anyhow::bail!("Timer '{name}' already exists (labels are unique per clock)");
        }

        check_predicate_true(
            callback.is_some() | inner.default_callback.is_some(),
            "No callbacks provided",
        )?;

        let mut start_time_ns = start_time_ns.unwrap_or_default();
        if start_time_ns == 0 {
            // Zero start time indicates no explicit start; we use the current time
            start_time_ns = self.timestamp_ns();
        }

        if let Some(stop_time_ns) = stop_time_ns {
            if stop_time_ns <= start_time_ns {
                anyhow::bail!(
                    "Timer '{name}' stop time {} must be after start time {}",
                    stop_time_ns.to_rfc3339(),
                    start_time_ns.to_rfc3339(),
                );
            }
            if start_time_ns + interval_ns > stop_time_ns {
                anyhow::bail!(
                    "Timer '{name}' first fire at {} would be after stop time {}",
                    (start_time_ns + interval_ns).to_rfc3339(),
                    stop_time_ns.to_rfc3339(),
                );
            }
        }

        let callback = match callback {
            Some(callback) => callback,
            None => inner
                .default_callback
                .clone()
                .expect("Default callback should exist"),
        };

        let interval_ns = create_valid_interval(interval_ns);

        let mut timer = LiveTimer::new(
            name,
            interval_ns,
            start_time_ns,
            stop_time_ns,
            false,
            trampoline,
        );
        timer.start();

        inner.callbacks.insert(name, callback);
        inner.timers.insert(name, timer);

        Ok(())
    }

    fn cancel_timer(&mut self, name: &str) {
        let name = Ustr::from(name);
        let mut inner = self.inner.lock().expect(MUTEX_POISONED);
        match inner.timers.remove(&name) {
            Some(mut timer) => {
                timer.cancel();
                inner.callbacks.remove(&name);
            }
            None => log::warn!("Timer '{name}' not found"),
        }
    }

    fn cancel_timers(&mut self) {
        let mut inner = self.inner.lock().expect(MUTEX_POISONED);
        for timer in inner.timers.values_mut() {
            timer.cancel();
        }

        inner.timers.clear();
        inner.callbacks.clear();
    }

    fn reset(&mut self) {
        self.cancel_timers();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
