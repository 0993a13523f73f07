//! Counter statistic
//!
//! A named monotonic counter with optional sub-keys: incrementing with a
//! non-empty subkey bumps both the primary count and the subkey's own
//! counter, creating it on first use. Sub-key iteration order is
//! unspecified.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CounterStatistic {
    name: String,
    count: i64,
    subkey_count: HashMap<String, i64>,
}

impl CounterStatistic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            count: 0,
            subkey_count: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `n` to the primary count and, when `subkey` is non-empty, to the
    /// subkey's counter.
    pub fn increase(&mut self, n: i64, subkey: &str) {
        self.count += n;
        if !subkey.is_empty() {
            *self.subkey_count.entry(subkey.to_string()).or_insert(0) += n;
        }
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn subkey_count(&self, subkey: &str) -> i64 {
        self.subkey_count.get(subkey).copied().unwrap_or(0)
    }

    /// Sum another counter into this one, primary count and every subkey.
    pub fn combine(&mut self, other: &CounterStatistic) {
        self.count += other.count;
        for (subkey, n) in &other.subkey_count {
            *self.subkey_count.entry(subkey.clone()).or_insert(0) += n;
        }
    }

    pub fn print(&self) {
        println!("  Count: {}", self.count);
        for (subkey, n) in &self.subkey_count {
            println!("  Count[{}]: {}", subkey, n);
        }
    }

    pub fn to_dynamic(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("count".into(), Value::from(self.count));
        for (subkey, n) in &self.subkey_count {
            map.insert(subkey.clone(), Value::from(*n));
        }
        Value::Object(map)
    }

    /// Flatten into named scalars: `<name>` and `<name>.<subkey>`.
    pub fn counters(&self) -> HashMap<String, i64> {
        let mut m = HashMap::new();
        m.insert(self.name.clone(), self.count);
        for (subkey, n) in &self.subkey_count {
            m.insert(format!("{}.{}", self.name, subkey), *n);
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let mut c = CounterStatistic::new("requests");
        c.increase(1, "");
        c.increase(2, "");
        assert_eq!(c.count(), 3);
        assert_eq!(c.subkey_count("anything"), 0);
    }

    #[test]
    fn test_counter_subkeys() {
        let mut c = CounterStatistic::new("exceptions");
        c.increase(1, "timeout");
        c.increase(1, "timeout");
        c.increase(5, "protocol");
        assert_eq!(c.count(), 7);
        assert_eq!(c.subkey_count("timeout"), 2);
        assert_eq!(c.subkey_count("protocol"), 5);
    }

    #[test]
    fn test_counter_combine() {
        let mut a = CounterStatistic::new("exceptions");
        let mut b = CounterStatistic::new("exceptions");
        a.increase(2, "timeout");
        b.increase(3, "timeout");
        b.increase(1, "connection_closed");
        a.combine(&b);
        assert_eq!(a.count(), 6);
        assert_eq!(a.subkey_count("timeout"), 5);
        assert_eq!(a.subkey_count("connection_closed"), 1);
    }

    #[test]
    fn test_counter_export() {
        let mut c = CounterStatistic::new("exceptions");
        c.increase(4, "timeout");
        let counters = c.counters();
        assert_eq!(counters["exceptions"], 4);
        assert_eq!(counters["exceptions.timeout"], 4);

        let d = c.to_dynamic();
        assert_eq!(d["count"], 4);
        assert_eq!(d["timeout"], 4);
    }
}
