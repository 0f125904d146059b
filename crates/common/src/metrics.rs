//! Process metrics registry and Prometheus text exporter.
//!
//! Each component creates one [`Metrics`] registry at startup, bumps
//! counters and gauges from its workers, and serves the rendered text
//! form at `/metrics` via [`crate::observe`].

use parking_lot::Mutex;
use std::collections::BTreeMap;

type LabelSet = Vec<(&'static str, String)>;

#[derive(Default)]
struct Registry {
    help: BTreeMap<&'static str, &'static str>,
    counters: BTreeMap<&'static str, BTreeMap<LabelSet, u64>>,
    gauges: BTreeMap<&'static str, BTreeMap<LabelSet, f64>>,
}

/// Metrics registry for one component process.
pub struct Metrics {
    namespace: &'static str,
    registry: Mutex<Registry>,
}

impl Metrics {
    pub fn new(namespace: &'static str) -> Self {
        Self {
            namespace,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Register help text for a metric name. First registration wins.
    pub fn describe(&self, name: &'static str, help: &'static str) {
        self.registry.lock().help.entry(name).or_insert(help);
    }

    /// Increment a labelled counter.
    pub fn inc(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        self.inc_by(name, labels, 1);
    }

    /// Increment a labelled counter by `value`.
    pub fn inc_by(&self, name: &'static str, labels: &[(&'static str, &str)], value: u64) {
        let key = owned_labels(labels);
        let mut registry = self.registry.lock();
        *registry
            .counters
            .entry(name)
            .or_default()
            .entry(key)
            .or_insert(0) += value;
    }

    /// Set a labelled gauge to an absolute value.
    pub fn set_gauge(&self, name: &'static str, labels: &[(&'static str, &str)], value: f64) {
        let key = owned_labels(labels);
        let mut registry = self.registry.lock();
        registry.gauges.entry(name).or_default().insert(key, value);
    }

    /// Export all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let registry = self.registry.lock();
        let mut output = String::new();

        for (name, series) in &registry.counters {
            self.write_family(&mut output, &registry.help, name, "counter");
            for (labels, value) in series {
                self.write_sample(&mut output, name, labels, &value.to_string());
            }
        }
        for (name, series) in &registry.gauges {
            self.write_family(&mut output, &registry.help, name, "gauge");
            for (labels, value) in series {
                self.write_sample(&mut output, name, labels, &value.to_string());
            }
        }

        output
    }

    fn write_family(
        &self,
        output: &mut String,
        help: &BTreeMap<&'static str, &'static str>,
        name: &str,
        kind: &str,
    ) {
        let full_name = format!("{}_{}", self.namespace, name);
        if let Some(help_text) = help.get(name) {
            output.push_str(&format!("# HELP {} {}\n", full_name, help_text));
        }
        output.push_str(&format!("# TYPE {} {}\n", full_name, kind));
    }

    fn write_sample(&self, output: &mut String, name: &str, labels: &LabelSet, value: &str) {
        let full_name = format!("{}_{}", self.namespace, name);
        if labels.is_empty() {
            output.push_str(&format!("{} {}\n", full_name, value));
            return;
        }
        let labels_str = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(",");
        output.push_str(&format!("{}{{{}}} {}\n", full_name, labels_str, value));
    }
}

fn owned_labels(labels: &[(&'static str, &str)]) -> LabelSet {
    labels.iter().map(|(k, v)| (*k, v.to_string())).collect()
}
