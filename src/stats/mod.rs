//! Streaming statistics
//!
//! Statistics are thread-local: every thread records into its own
//! [`StatisticsManager`] through [`local()`], with no cross-thread
//! synchronization on the hot path beyond the manager's own (uncontended)
//! mutex. All managers register themselves in a process-wide list so
//! [`combined()`] can fold them into one view at shutdown or on demand
//! from the control plane.
//!
//! Two statistic shapes exist:
//!
//! - [`ContinuousStatistic`]: streaming moments plus a self-calibrating
//!   histogram, for latencies and sampled rates
//! - [`CounterStatistic`]: a monotonic counter with optional sub-keys,
//!   for request/error tallies
//!
//! Combining across the two shapes is a programming error and panics.

pub mod continuous;
pub mod counter;
pub mod histogram;

pub use continuous::ContinuousStatistic;
pub use counter::CounterStatistic;

use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

// Well-known statistic names
pub const REQUEST_LATENCY: &str = "request_latency";
pub const THROUGHPUT: &str = "throughput";
pub const OUTSTANDING_REQUESTS: &str = "outstanding_requests";
pub const EXCEPTIONS: &str = "exceptions";
pub const UNCAUGHT_EXCEPTIONS: &str = "uncaught_exceptions";

/// Warm-up and calibration budgets for continuous statistics.
///
/// Request latency gets larger budgets than other statistics: its early
/// samples are dominated by cold connections and are discarded, and the
/// wider calibration window gives the histogram a range that survives the
/// steady state.
#[derive(Debug, Clone, Copy)]
pub struct StatSettings {
    pub default_warmup_samples: usize,
    pub default_calibration_samples: usize,
    pub latency_warmup_samples: usize,
    pub latency_calibration_samples: usize,
}

impl Default for StatSettings {
    fn default() -> Self {
        Self {
            default_warmup_samples: 10,
            default_calibration_samples: 10,
            latency_warmup_samples: 1000,
            latency_calibration_samples: 1000,
        }
    }
}

static SETTINGS: OnceLock<StatSettings> = OnceLock::new();

/// Install the statistic lifecycle budgets. Call once at startup; later
/// calls are ignored.
pub fn configure(settings: StatSettings) {
    let _ = SETTINGS.set(settings);
}

fn settings() -> StatSettings {
    *SETTINGS.get_or_init(StatSettings::default)
}

/// A statistic of either shape.
#[derive(Debug, Clone)]
pub enum Statistic {
    Continuous(ContinuousStatistic),
    Counter(CounterStatistic),
}

impl Statistic {
    pub fn name(&self) -> &str {
        match self {
            Statistic::Continuous(s) => s.name(),
            Statistic::Counter(s) => s.name(),
        }
    }

    /// Fold `other` into this statistic. Panics when the variants differ;
    /// a name can only ever hold one statistic shape.
    pub fn combine(&mut self, other: &Statistic) {
        match (self, other) {
            (Statistic::Continuous(s), Statistic::Continuous(o)) => s.combine(o),
            (Statistic::Counter(s), Statistic::Counter(o)) => s.combine(o),
            (s, o) => panic!(
                "cannot combine statistic '{}' across shapes ('{}')",
                s.name(),
                o.name()
            ),
        }
    }

    pub fn print(&mut self) {
        match self {
            Statistic::Continuous(s) => s.print(),
            Statistic::Counter(s) => s.print(),
        }
    }

    pub fn to_dynamic(&mut self) -> Value {
        match self {
            Statistic::Continuous(s) => s.to_dynamic(),
            Statistic::Counter(s) => s.to_dynamic(),
        }
    }

    pub fn counters(&mut self) -> HashMap<String, i64> {
        match self {
            Statistic::Continuous(s) => s.counters(),
            Statistic::Counter(s) => s.counters(),
        }
    }
}

/// Registry of named statistics for one thread.
#[derive(Debug, Default)]
pub struct StatisticsManager {
    stat_map: HashMap<String, Statistic>,
}

impl StatisticsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the continuous statistic with this name.
    pub fn continuous(&mut self, name: &str) -> &mut ContinuousStatistic {
        let stat = self.stat_map.entry(name.to_string()).or_insert_with(|| {
            let s = settings();
            let (warmup, calibration) = if name == REQUEST_LATENCY {
                (s.latency_warmup_samples, s.latency_calibration_samples)
            } else {
                (s.default_warmup_samples, s.default_calibration_samples)
            };
            Statistic::Continuous(ContinuousStatistic::new(name, warmup, calibration))
        });
        match stat {
            Statistic::Continuous(s) => s,
            Statistic::Counter(_) => panic!("statistic '{}' is a counter", name),
        }
    }

    /// Get or create the counter statistic with this name.
    pub fn counter(&mut self, name: &str) -> &mut CounterStatistic {
        let stat = self
            .stat_map
            .entry(name.to_string())
            .or_insert_with(|| Statistic::Counter(CounterStatistic::new(name)));
        match stat {
            Statistic::Counter(s) => s,
            Statistic::Continuous(_) => panic!("statistic '{}' is continuous", name),
        }
    }

    /// Fold every statistic of `other` into this manager.
    pub fn combine(&mut self, other: &StatisticsManager) {
        for (name, stat) in &other.stat_map {
            match self.stat_map.get_mut(name) {
                Some(existing) => existing.combine(stat),
                None => {
                    self.stat_map.insert(name.clone(), stat.clone());
                }
            }
        }
    }

    /// Log one summary block per statistic.
    pub fn print(&mut self) {
        println!("Statistics:");
        println!();
        let mut names: Vec<String> = self.stat_map.keys().cloned().collect();
        names.sort();
        for name in names {
            println!("{}", name);
            self.stat_map.get_mut(&name).unwrap().print();
        }
    }

    pub fn to_dynamic(&mut self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, stat) in self.stat_map.iter_mut() {
            map.insert(name.clone(), stat.to_dynamic());
        }
        Value::Object(map)
    }

    /// Flatten every statistic into named scalars.
    pub fn export_counters(&mut self) -> BTreeMap<String, i64> {
        let mut all = BTreeMap::new();
        for stat in self.stat_map.values_mut() {
            all.extend(stat.counters());
        }
        all
    }

    pub fn stat_names(&self) -> Vec<String> {
        self.stat_map.keys().cloned().collect()
    }
}

fn global_managers() -> &'static Mutex<Vec<Arc<Mutex<StatisticsManager>>>> {
    static MANAGERS: OnceLock<Mutex<Vec<Arc<Mutex<StatisticsManager>>>>> = OnceLock::new();
    MANAGERS.get_or_init(|| Mutex::new(Vec::new()))
}

thread_local! {
    static LOCAL_MANAGER: RefCell<Option<Arc<Mutex<StatisticsManager>>>> =
        const { RefCell::new(None) };
}

/// The calling thread's statistics manager, created and registered in the
/// process-wide list on first use. The mutex is only ever contended when
/// the combined view is being taken.
pub fn local() -> Arc<Mutex<StatisticsManager>> {
    LOCAL_MANAGER.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_ref() {
            Some(manager) => Arc::clone(manager),
            None => {
                let manager = Arc::new(Mutex::new(StatisticsManager::new()));
                global_managers().lock().unwrap().push(Arc::clone(&manager));
                *slot = Some(Arc::clone(&manager));
                manager
            }
        }
    })
}

/// Fold every thread's manager into a fresh combined view.
pub fn combined() -> StatisticsManager {
    let mut result = StatisticsManager::new();
    let managers = global_managers().lock().unwrap();
    for manager in managers.iter() {
        result.combine(&manager.lock().unwrap());
    }
    result
}

/// Print the combined statistics of every thread.
pub fn print_all() {
    combined().print();
}

/// Serialize the combined statistics to a JSON string.
pub fn to_json() -> String {
    combined().to_dynamic().to_string()
}

/// Flatten the combined statistics into named scalar counters.
pub fn export_all_counters() -> BTreeMap<String, i64> {
    combined().export_counters()
}
