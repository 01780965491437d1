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

//! Real-time and test timers for use with `Clock` implementations.

use std::{
    cmp::Ordering,
    fmt::{Debug, Display},
    num::NonZeroU64,
    sync::Arc,
};

use meridian_core::{
    UUID4, UnixNanos,
    correctness::{FAILED, check_valid_string},
    time::get_atomic_clock_realtime,
};
use tokio::{task::JoinHandle, time::Duration};
use ustr::Ustr;

use crate::runtime::get_runtime;

/// Creates a valid nanoseconds interval that is guaranteed to be positive.
///
/// A zero interval is clamped to one nanosecond, which covers the degenerate
/// case of an alert registered for exactly the current instant.
#[must_use]
pub const fn create_valid_interval(interval_ns: u64) -> NonZeroU64 {
    match NonZeroU64::new(if interval_ns == 0 { 1 } else { interval_ns }) {
        Some(value) => value,
        None => unreachable!(),
    }
}

/// Represents a time event occurring at the event timestamp.
///
/// A `TimeEvent` carries the name of the timer which fired it, a unique event ID,
/// and timestamps indicating when the event was scheduled to occur and when it was initialized.
#[derive(Clone, Debug, Eq)]
pub struct TimeEvent {
    /// The event name, identifying the timer which produced the event.
    pub name: Ustr,
    /// The unique identifier for the event.
    pub event_id: UUID4,
    /// UNIX timestamp (nanoseconds) when the event occurred.
    pub ts_event: UnixNanos,
    /// UNIX timestamp (nanoseconds) when the instance was initialized.
    pub ts_init: UnixNanos,
}

impl TimeEvent {
    /// Creates a new [`TimeEvent`] instance.
    #[must_use]
    pub const fn new(name: Ustr, event_id: UUID4, ts_event: UnixNanos, ts_init: UnixNanos) -> Self {
        Self {
            name,
            event_id,
            ts_event,
            ts_init,
        }
    }
}

/// Events are ordered by their scheduled timestamp, with the name breaking ties
/// so that replays of interleaved timers are deterministic.
impl Ord for TimeEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ts_event
            .cmp(&other.ts_event)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for TimeEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Identity is carried by the event ID.
impl PartialEq for TimeEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id
    }
}

impl std::hash::Hash for TimeEvent {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.event_id.hash(state);
    }
}

impl Display for TimeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TimeEvent(name={}, event_id={}, ts_event={}, ts_init={})",
            self.name, self.event_id, self.ts_event, self.ts_init
        )
    }
}

/// The callback function type invoked with a fired [`TimeEvent`].
pub type TimeEventCallbackFn = dyn Fn(TimeEvent) + Send + Sync;

/// A cloneable handler for time events, invoked synchronously at dispatch.
#[derive(Clone)]
pub struct TimeEventCallback {
    inner: Arc<TimeEventCallbackFn>,
}

impl TimeEventCallback {
    /// Invokes the callback with the given `event`.
    pub fn call(&self, event: TimeEvent) {
        (self.inner)(event);
    }
}

impl Debug for TimeEventCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(stringify!(TimeEventCallback))
    }
}

impl<F> From<F> for TimeEventCallback
where
    F: Fn(TimeEvent) + Send + Sync + 'static,
{
    fn from(value: F) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

/// Represents a time event and its associated handler.
///
/// `TimeEventHandler` associates a [`TimeEvent`] with the callback registered
/// for its timer at the moment the event was harvested.
#[derive(Clone, Debug)]
pub struct TimeEventHandler {
    /// The time event.
    pub event: TimeEvent,
    /// The callable handler for the event.
    pub callback: TimeEventCallback,
}

impl TimeEventHandler {
    /// Creates a new [`TimeEventHandler`] instance.
    #[must_use]
    pub const fn new(event: TimeEvent, callback: TimeEventCallback) -> Self {
        Self { event, callback }
    }

    /// Consumes the handler, invoking the callback with the event.
    pub fn run(self) {
        let Self { event, callback } = self;
        callback.call(event);
    }
}

impl PartialOrd for TimeEventHandler {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimeEventHandler {
    fn eq(&self, other: &Self) -> bool {
        self.event.ts_event == other.event.ts_event
    }
}

impl Eq for TimeEventHandler {}

impl Ord for TimeEventHandler {
    fn cmp(&self, other: &Self) -> Ordering {
        self.event.cmp(&other.event)
    }
}

/// A test timer for use with a `TestClock`.
///
/// `TestTimer` simulates time progression in a controlled environment,
/// allowing for precise control over event generation in test scenarios.
#[derive(Clone, Copy, Debug)]
pub struct TestTimer {
    /// The name of the timer.
    pub name: Ustr,
    /// The interval between timer events in nanoseconds.
    pub interval_ns: NonZeroU64,
    /// The start time of the timer in UNIX nanoseconds.
    pub start_time_ns: UnixNanos,
    /// The optional stop time of the timer in UNIX nanoseconds.
    pub stop_time_ns: Option<UnixNanos>,
    next_time_ns: UnixNanos,
    is_expired: bool,
}

impl TestTimer {
    /// Creates a new [`TestTimer`] instance.
    ///
    /// When `fire_immediately` is true the first fire is scheduled at `start_time_ns`
    /// itself rather than one interval later (used for alerts due at the current instant).
    ///
    /// # Panics
    ///
    /// This function panics if `name` is not a valid string.
    #[must_use]
    pub fn new(
        name: Ustr,
        interval_ns: NonZeroU64,
        start_time_ns: UnixNanos,
        stop_time_ns: Option<UnixNanos>,
        fire_immediately: bool,
    ) -> Self {
        check_valid_string(name, stringify!(name)).expect(FAILED);

        let next_time_ns = if fire_immediately {
            start_time_ns
        } else {
            start_time_ns + interval_ns.get()
        };

        Self {
            name,
            interval_ns,
            start_time_ns,
            stop_time_ns,
            next_time_ns,
            is_expired: false,
        }
    }

    /// Returns the next time in UNIX nanoseconds when the timer will fire.
    #[must_use]
    pub const fn next_time_ns(&self) -> UnixNanos {
        self.next_time_ns
    }

    /// Returns whether the timer is expired.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.is_expired
    }

    /// Advances the timer bookkeeping to its successor fire time.
    ///
    /// When a stop time is set and the successor fire time lies beyond it,
    /// the timer latches expired and emits no further events.
    pub fn iterate_next(&mut self) {
        debug_assert!(!self.is_expired, "`iterate_next` called on expired timer");

        self.next_time_ns += self.interval_ns;

        if let Some(stop_time_ns) = self.stop_time_ns {
            if self.next_time_ns > stop_time_ns {
                self.is_expired = true;
            }
        }
    }

    /// Advances the test timer forward to the given time, generating a sequence
    /// of events. A [`TimeEvent`] is yielded for each fire time which is
    /// <= the given `to_time_ns`, in ascending order.
    ///
    /// This allows testing of multiple time intervals within a single step.
    pub fn advance(&mut self, to_time_ns: UnixNanos) -> impl Iterator<Item = TimeEvent> + '_ {
        let advances = if to_time_ns < self.next_time_ns {
            0
        } else {
            (to_time_ns.as_u64() - self.next_time_ns.as_u64()) / self.interval_ns.get() + 1
        };
        self.take(advances as usize)
    }

    /// Cancels the timer (the timer will not generate a final event).
    ///
    /// Used to stop the timer before its scheduled stop time.
    pub const fn cancel(&mut self) {
        self.is_expired = true;
    }
}

impl Iterator for TestTimer {
    type Item = TimeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_expired {
            None
        } else {
            let event = TimeEvent::new(
                self.name,
                UUID4::new(),
                self.next_time_ns,
                self.next_time_ns,
            );

            self.iterate_next();

            Some(event)
        }
    }
}

/// The function type for clock-internal trampolines armed on live timers.
///
/// A trampoline receives the timer name and the scheduled fire time; it is the
/// clock's responsibility to construct the [`TimeEvent`], perform registry
/// bookkeeping, and dispatch the user handler.
pub type TimerTrampolineFn = dyn Fn(Ustr, UnixNanos) + Send + Sync;

/// A cloneable clock-internal callback invoked when a live timer's delay elapses.
#[derive(Clone)]
pub struct TimerTrampoline {
    inner: Arc<TimerTrampolineFn>,
}

impl TimerTrampoline {
    /// Invokes the trampoline for the given timer `name` and scheduled fire time.
    pub fn call(&self, name: Ustr, event_time_ns: UnixNanos) {
        (self.inner)(name, event_time_ns);
    }
}

impl Debug for TimerTrampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(stringify!(TimerTrampoline))
    }
}

impl<F> From<F> for TimerTrampoline
where
    F: Fn(Ustr, UnixNanos) + Send + Sync + 'static,
{
    fn from(value: F) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

/// A live timer for use with a `LiveClock`.
///
/// `LiveTimer` arms a delayed task on the shared Tokio runtime for each fire.
/// The armed task invokes the clock-internal trampoline rather than the user
/// handler directly, which centralizes expiry bookkeeping in the clock. For
/// repeating timers the clock re-arms a fresh task after each successful fire
/// via [`LiveTimer::repeat`].
#[derive(Debug)]
pub struct LiveTimer {
    /// The name of the timer.
    pub name: Ustr,
    /// The interval between timer events in nanoseconds.
    pub interval_ns: NonZeroU64,
    /// The start time of the timer in UNIX nanoseconds.
    pub start_time_ns: UnixNanos,
    /// The optional stop time of the timer in UNIX nanoseconds.
    pub stop_time_ns: Option<UnixNanos>,
    next_time_ns: UnixNanos,
    trampoline: TimerTrampoline,
    task_handle: Option<JoinHandle<()>>,
}

impl LiveTimer {
    /// Creates a new [`LiveTimer`] instance.
    ///
    /// The timer is created unarmed; call [`LiveTimer::start`] to arm the first fire.
    ///
    /// # Panics
    ///
    /// This function panics if `name` is not a valid string.
    #[must_use]
    pub fn new(
        name: Ustr,
        interval_ns: NonZeroU64,
        start_time_ns: UnixNanos,
        stop_time_ns: Option<UnixNanos>,
        fire_immediately: bool,
        trampoline: TimerTrampoline,
    ) -> Self {
        check_valid_string(name, stringify!(name)).expect(FAILED);

        log::debug!("Creating timer '{name}'");

        let next_time_ns = if fire_immediately {
            start_time_ns
        } else {
            start_time_ns + interval_ns.get()
        };

        Self {
            name,
            interval_ns,
            start_time_ns,
            stop_time_ns,
            next_time_ns,
            trampoline,
            task_handle: None,
        }
    }

    /// Returns the next time in UNIX nanoseconds when the timer will fire.
    #[must_use]
    pub const fn next_time_ns(&self) -> UnixNanos {
        self.next_time_ns
    }

    /// Returns whether the timer is expired.
    ///
    /// An expired timer will not trigger any further events.
    /// A timer that has not been started is not expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(tokio::task::JoinHandle::is_finished)
    }

    /// Starts the timer, arming a delayed task for the first fire.
    ///
    /// A first fire time already in the past is adjusted to the current time
    /// so the timer fires immediately.
    pub fn start(&mut self) {
        let now_ns = get_atomic_clock_realtime().get_time_ns();

        if self.next_time_ns < now_ns {
            log::warn!(
                "Timer '{}' next time {} was in the past, adjusted to current time for immediate fire",
                self.name,
                self.next_time_ns.to_rfc3339(),
            );
            self.next_time_ns = now_ns;
        }

        self.arm(now_ns);
    }

    /// Advances the timer bookkeeping to its successor fire time.
    pub fn iterate_next(&mut self) {
        self.next_time_ns += self.interval_ns;
    }

    /// Re-arms a fresh delayed task for the next fire.
    ///
    /// Called by the clock after each successful fire of a repeating timer,
    /// following [`LiveTimer::iterate_next`].
    pub fn repeat(&mut self, now_ns: UnixNanos) {
        self.arm(now_ns);
    }

    fn arm(&mut self, now_ns: UnixNanos) {
        let name = self.name;
        let fire_time_ns = self.next_time_ns;
        let trampoline = self.trampoline.clone();
        let delay_ns = fire_time_ns.saturating_sub(now_ns.as_u64());

        let rt = get_runtime();
        let handle = rt.spawn(async move {
            tokio::time::sleep(Duration::from_nanos(delay_ns)).await;
            trampoline.call(name, fire_time_ns);
        });

        // The fresh task supersedes the previous handle, which has already fired
        self.task_handle = Some(handle);
    }

    /// Cancels the timer.
    ///
    /// Aborts any pending delayed task; the timer will not generate a final event.
    pub fn cancel(&mut self) {
        log::debug!("Cancel timer '{}'", self.name);
        if let Some(ref handle) = self.task_handle {
            handle.abort();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use meridian_core::UnixNanos;
    use rstest::rstest;
    use ustr::Ustr;

    use super::{TestTimer, TimeEvent, create_valid_interval};

    fn new_timer(interval: u64, start: u64, stop: Option<u64>) -> TestTimer {
        TestTimer::new(
            Ustr::from("TEST_TIMER"),
            NonZeroU64::new(interval).unwrap(),
            UnixNanos::from(start),
            stop.map(UnixNanos::from),
            false,
        )
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(42, 42)]
    fn test_create_valid_interval(#[case] value: u64, #[case] expected: u64) {
        assert_eq!(create_valid_interval(value).get(), expected);
    }

    #[rstest]
    fn test_next_time_after_construction() {
        let timer = new_timer(5, 10, None);
        assert_eq!(timer.next_time_ns(), 15);
        assert!(!timer.is_expired());
    }

    #[rstest]
    fn test_fire_immediately_first_fire_at_start() {
        let timer = TestTimer::new(
            Ustr::from("TEST_TIMER"),
            NonZeroU64::new(5).unwrap(),
            UnixNanos::from(10),
            None,
            true,
        );
        assert_eq!(timer.next_time_ns(), 10);
    }

    #[rstest]
    fn test_advance_within_next_time() {
        let mut timer = new_timer(5, 0, None);
        let _: Vec<TimeEvent> = timer.advance(UnixNanos::from(1)).collect();
        let _: Vec<TimeEvent> = timer.advance(UnixNanos::from(2)).collect();
        let _: Vec<TimeEvent> = timer.advance(UnixNanos::from(3)).collect();
        assert_eq!(timer.advance(UnixNanos::from(4)).count(), 0);
        assert_eq!(timer.next_time_ns(), 5);
        assert!(!timer.is_expired());
    }

    #[rstest]
    fn test_advance_up_to_next_time() {
        let mut timer = new_timer(1, 0, None);
        assert_eq!(timer.advance(UnixNanos::from(1)).count(), 1);
        assert!(!timer.is_expired());
    }

    #[rstest]
    fn test_advance_up_to_stop_time() {
        let mut timer = new_timer(1, 0, Some(2));
        assert_eq!(timer.advance(UnixNanos::from(2)).count(), 2);
        assert!(timer.is_expired());
    }

    #[rstest]
    fn test_advance_beyond_stop_time() {
        let mut timer = new_timer(1, 0, Some(5));
        assert_eq!(timer.advance(UnixNanos::from(10)).count(), 5);
        assert!(timer.is_expired());
    }

    #[rstest]
    fn test_no_event_beyond_unaligned_stop_time() {
        // Stop time falls between the second and third fire
        let mut timer = new_timer(10, 0, Some(25));
        let events: Vec<TimeEvent> = timer.advance(UnixNanos::from(100)).collect();
        let times: Vec<u64> = events.iter().map(|e| e.ts_event.as_u64()).collect();
        assert_eq!(times, vec![10, 20]);
        assert!(timer.is_expired());
    }

    #[rstest]
    fn test_stop_time_equal_first_fire_fires_once() {
        let mut timer = new_timer(10, 0, Some(10));
        let events: Vec<TimeEvent> = timer.advance(UnixNanos::from(100)).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ts_event, 10);
        assert!(timer.is_expired());
    }

    #[rstest]
    fn test_advance_exact_boundary() {
        let mut timer = new_timer(5, 0, None);
        let events: Vec<TimeEvent> = timer.advance(UnixNanos::from(5)).collect();
        assert_eq!(events.len(), 1, "Expected one event at the 5 ns boundary");

        let events: Vec<TimeEvent> = timer.advance(UnixNanos::from(10)).collect();
        assert_eq!(events.len(), 1, "Expected one event at the 10 ns boundary");
    }

    #[rstest]
    fn test_advance_twice_with_same_to_time_is_empty() {
        let mut timer = new_timer(5, 0, None);
        assert_eq!(timer.advance(UnixNanos::from(12)).count(), 2);
        assert_eq!(timer.advance(UnixNanos::from(12)).count(), 0);
    }

    #[rstest]
    fn test_split_advance_equals_single_advance() {
        let mut split = new_timer(7, 3, Some(60));
        let mut fresh = new_timer(7, 3, Some(60));

        let mut split_events: Vec<u64> = Vec::new();
        for to in [10, 25, 25, 40, 90] {
            split_events.extend(split.advance(UnixNanos::from(to)).map(|e| e.ts_event.as_u64()));
        }
        let fresh_events: Vec<u64> = fresh
            .advance(UnixNanos::from(90))
            .map(|e| e.ts_event.as_u64())
            .collect();

        assert_eq!(split_events, fresh_events);
    }

    #[rstest]
    fn test_cancel_stops_events() {
        let mut timer = new_timer(1, 0, None);
        timer.cancel();
        assert!(timer.is_expired());
        assert_eq!(timer.advance(UnixNanos::from(100)).count(), 0);
    }

    #[rstest]
    fn test_iterator_stops_when_expired() {
        let mut timer = new_timer(1, 1, None);
        assert!(timer.next().is_some());
        assert!(timer.next().is_some());
        timer.cancel();
        assert!(timer.next().is_none());
    }

    #[rstest]
    fn test_event_ordering_by_timestamp_then_name() {
        use meridian_core::UUID4;

        let event = |name: &str, ts: u64| {
            TimeEvent::new(
                Ustr::from(name),
                UUID4::new(),
                UnixNanos::from(ts),
                UnixNanos::from(ts),
            )
        };

        let mut events = vec![event("b", 2), event("a", 2), event("c", 1)];
        events.sort();

        let order: Vec<(String, u64)> = events
            .iter()
            .map(|e| (e.name.to_string(), e.ts_event.as_u64()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("c".to_string(), 1),
                ("a".to_string(), 2),
                ("b".to_string(), 2),
            ]
        );
    }

    #[rstest]
    fn test_event_equality_by_id() {
        use meridian_core::UUID4;

        let name = Ustr::from("TEST_TIMER");
        let id = UUID4::new();
        let event1 = TimeEvent::new(name, id, UnixNanos::from(1), UnixNanos::from(1));
        let event2 = TimeEvent::new(name, id, UnixNanos::from(2), UnixNanos::from(2));
        let event3 = TimeEvent::new(name, UUID4::new(), UnixNanos::from(1), UnixNanos::from(1));

        assert_eq!(event1, event2);
        assert_ne!(event1, event3);
    }
}
