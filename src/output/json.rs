//! JSON statistics output
//!
//! The dump is one top-level object keyed by statistic name. Continuous
//! statistics serialize as `{n_samples, average, std_dev, p01..p99,
//! histogram: {upper_edge: count, ...}}`; counters as `{count, subkey:
//! count, ...}`.

use crate::stats;
use crate::Result;
use anyhow::Context;
use std::path::Path;

/// Write the combined statistics of every thread to `path`.
pub fn write_statistics(path: &Path) -> Result<()> {
    let dump = stats::combined().to_dynamic();
    let content =
        serde_json::to_string_pretty(&dump).context("Failed to serialize statistics")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write statistics to {:?}", path))?;
    println!("Statistics written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats;

    #[test]
    fn test_write_statistics_schema() {
        {
            let manager = stats::local();
            let mut m = manager.lock().unwrap();
            // Default lifecycle discards 10 warm-up and 10 calibration samples
            for i in 0..120 {
                m.continuous("json-test-latency").add_sample(i as f64);
            }
            m.counter("json-test-errors").increase(2, "timeout");
        }

        let path = std::env::temp_dir().join(format!("treadmill-json-{}.json", std::process::id()));
        write_statistics(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();

        let latency = &parsed["json-test-latency"];
        assert_eq!(latency["n_samples"], 100.0);
        assert!(latency["std_dev"].as_f64().is_some());
        assert!(latency["average"].as_f64().is_some());
        assert!(latency["p50"].as_f64().is_some());
        assert!(latency["p99"].as_f64().is_some());
        assert!(latency["histogram"].is_object());

        let errors = &parsed["json-test-errors"];
        assert_eq!(errors["count"], 2);
        assert_eq!(errors["timeout"], 2);

        std::fs::remove_file(&path).unwrap();
    }
}
