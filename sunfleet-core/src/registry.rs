//! Point watch registry.
//!
//! Maps each device to its watched points, in registration order. Every
//! entry owns exactly one callback plus the last value read for its point.
//! The callback and value share one lock, held while the callback runs, so
//! a point's callback never runs concurrently with itself.

use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tracing::debug;

use crate::error::{FleetError, Result};
use crate::point::{Point, PointSample};

/// Callback invoked after each read of a watched point.
pub type PointCallback<F, V> = Box<dyn FnMut(&PointSample<'_, F, V>) + Send>;

/// A watched point with its callback and last value.
pub struct WatchEntry<F, V> {
    point: Point<F>,
    state: Mutex<EntryState<F, V>>,
}

struct EntryState<F, V> {
    callback: PointCallback<F, V>,
    last_value: Option<V>,
    read_at: Option<SystemTime>,
}

impl<F, V: Clone> WatchEntry<F, V> {
    fn new(point: Point<F>, callback: PointCallback<F, V>) -> Self {
        Self {
            point,
            state: Mutex::new(EntryState {
                callback,
                last_value: None,
                read_at: None,
            }),
        }
    }

    pub fn point(&self) -> &Point<F> {
        &self.point
    }

    /// Last successfully read value.
    pub fn last_value(&self) -> Option<V> {
        self.lock().last_value.clone()
    }

    /// Record the outcome of a read and run the callback.
    ///
    /// `Some(value)` is a fresh read; `None` means retries were exhausted
    /// and the callback sees the previous value.
    pub fn deliver(&self, value: Option<V>) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let fresh = value.is_some();
        if let Some(value) = value {
            state.last_value = Some(value);
            state.read_at = Some(SystemTime::now());
        }

        let sample = PointSample {
            point: &self.point,
            value: state.last_value.as_ref(),
            fresh,
            read_at: state.read_at,
        };
        (state.callback)(&sample);
    }

    fn replace_callback(&self, callback: PointCallback<F, V>) {
        self.lock().callback = callback;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EntryState<F, V>> {
        // A panicking callback poisons the lock; the state itself stays valid.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Watched points grouped by device.
pub struct WatchRegistry<F, V> {
    buckets: Vec<(String, Vec<Arc<WatchEntry<F, V>>>)>,
}

impl<F, V> Default for WatchRegistry<F, V> {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }
}

impl<F, V> WatchRegistry<F, V>
where
    F: Eq + Display,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `point`, replacing any previous callback.
    ///
    /// A replaced entry keeps its position in the device's read order.
    /// Returns true if a previous callback was replaced.
    pub fn watch(&mut self, point: Point<F>, callback: PointCallback<F, V>) -> bool {
        let index = match self
            .buckets
            .iter()
            .position(|(device, _)| device == point.device())
        {
            Some(index) => index,
            None => {
                self.buckets.push((point.device().to_string(), Vec::new()));
                self.buckets.len() - 1
            }
        };
        let bucket = &mut self.buckets[index].1;

        if let Some(entry) = bucket.iter().find(|entry| entry.point == point) {
            debug!(point = %point, "Replacing watch callback");
            entry.replace_callback(callback);
            return true;
        }

        debug!(point = %point, "Watching point");
        bucket.push(Arc::new(WatchEntry::new(point, callback)));
        false
    }

    /// Register several points at once.
    pub fn watch_many<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = (Point<F>, PointCallback<F, V>)>,
    {
        for (point, callback) in points {
            self.watch(point, callback);
        }
    }

    /// The entry for `point`, or [`FleetError::NotWatched`].
    pub fn lookup(&self, point: &Point<F>) -> Result<Arc<WatchEntry<F, V>>> {
        self.entries(point.device())
            .iter()
            .find(|entry| entry.point == *point)
            .cloned()
            .ok_or_else(|| FleetError::NotWatched(point.to_string()))
    }

    pub fn contains(&self, point: &Point<F>) -> bool {
        self.lookup(point).is_ok()
    }

    /// Watched entries of one device in registration order.
    pub fn entries(&self, device: &str) -> &[Arc<WatchEntry<F, V>>] {
        self.buckets
            .iter()
            .find(|(name, _)| name == device)
            .map(|(_, entries)| entries.as_slice())
            .unwrap_or(&[])
    }

    /// Devices with at least one watched point, with their entries.
    pub fn devices(&self) -> impl Iterator<Item = (&str, &[Arc<WatchEntry<F, V>>])> {
        self.buckets
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(device, entries)| (device.as_str(), entries.as_slice()))
    }

    /// Total number of watched points.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|(_, entries)| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Registry = WatchRegistry<&'static str, i64>;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> PointCallback<&'static str, i64> {
        let log = log.clone();
        Box::new(move |sample: &PointSample<'_, &'static str, i64>| {
            log.lock()
                .unwrap()
                .push(format!("{}:{}:{:?}:{}", tag, sample.point, sample.value, sample.fresh));
        })
    }

    #[test]
    fn test_registration_order_per_device() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();

        registry.watch(Point::new("inverter", "W"), recorder(&log, "a"));
        registry.watch(Point::new("battery", "SoC"), recorder(&log, "b"));
        registry.watch(Point::new("inverter", "Whx"), recorder(&log, "c"));

        let inverter: Vec<_> = registry
            .entries("inverter")
            .iter()
            .map(|e| *e.point().field())
            .collect();
        assert_eq!(inverter, ["W", "Whx"]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.devices().count(), 2);
    }

    #[test]
    fn test_rewatch_replaces_callback_in_place() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();

        assert!(!registry.watch(Point::new("inverter", "W"), recorder(&log, "first")));
        registry.watch(Point::new("inverter", "Whx"), recorder(&log, "other"));
        assert!(registry.watch(Point::new("inverter", "W"), recorder(&log, "second")));

        assert_eq!(registry.len(), 2);
        let entries = registry.entries("inverter");
        assert_eq!(*entries[0].point().field(), "W");

        entries[0].deliver(Some(5));
        assert_eq!(*log.lock().unwrap(), ["second:inverter.W:Some(5):true"]);
    }

    #[test]
    fn test_lookup_unwatched() {
        let registry = Registry::new();
        let err = match registry.lookup(&Point::new("battery", "SoC")) {
            Err(e) => e,
            Ok(_) => panic!("expected NotWatched"),
        };
        assert!(matches!(err, FleetError::NotWatched(p) if p == "battery.SoC"));
    }

    #[test]
    fn test_stale_delivery_keeps_last_value() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry.watch(Point::new("battery", "SoC"), recorder(&log, "s"));

        let entry = registry.lookup(&Point::new("battery", "SoC")).unwrap();
        entry.deliver(None);
        entry.deliver(Some(870));
        entry.deliver(None);

        assert_eq!(entry.last_value(), Some(870));
        assert_eq!(
            *log.lock().unwrap(),
            [
                "s:battery.SoC:None:false",
                "s:battery.SoC:Some(870):true",
                "s:battery.SoC:Some(870):false",
            ]
        );
    }

    #[test]
    fn test_watch_many() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();

        let points = ["A", "B", "C"].into_iter().map(|field| {
            let calls = calls.clone();
            let callback: PointCallback<&'static str, i64> = Box::new(move |_: &PointSample<'_, &'static str, i64>| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            (Point::new("pv_link_3", field), callback)
        });
        registry.watch_many(points);

        for entry in registry.entries("pv_link_3") {
            entry.deliver(Some(1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(registry.contains(&Point::new("pv_link_3", "B")));
        assert!(!registry.is_empty());
    }
}
