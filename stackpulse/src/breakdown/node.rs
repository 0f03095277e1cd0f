//! Breakdown tree node
//!
//! # Concurrency
//!
//! Every node carries its own [`RwLock`] guarding the children map and the
//! percentile reservoir. `measurement` and `sample_count` live outside the
//! lock: `increment` is a pair of atomic adds so that writers hammering a hot
//! frame never wait behind someone inserting a sibling elsewhere.
//!
//! Children are held as `Arc<BreakdownNode>` so a writer can keep a handle to
//! a node after releasing its parent's lock. Finalization passes (`propagate`,
//! filters, scaling) snapshot the child list before recursing, so no lock is
//! held across levels.
//!
//! # Lifecycle
//!
//! ```text
//! live window          detach            finalize                  ship
//! ───────────          ──────            ────────                  ────
//! get_or_create_child  swap map/root     evaluate_percentile()     to_record()
//! increment            under owner's     propagate()
//! record_for_percentile  lock            filter_* / scale
//! ```

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use parking_lot::RwLock;
use rand::Rng;
use stackpulse_common::BreakdownRecord;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::AtomicF64;

/// Maximum number of values retained for percentile estimation
pub const RESERVOIR_SIZE: usize = 1000;

/// Percentile reported by [`BreakdownNode::evaluate_percentile`]
pub const PERCENTILE: f64 = 0.95;

/// Name of the synthetic node every reported tree hangs from
pub const ROOT_NAME: &str = "root";

#[derive(Debug, Default)]
struct NodeState {
    children: HashMap<String, Arc<BreakdownNode>>,
    reservoir: Vec<f64>,
    /// Values offered to the reservoir since it was last cleared
    offered: u64,
}

/// One named node of a breakdown tree
#[derive(Debug)]
pub struct BreakdownNode {
    name: String,
    measurement: AtomicF64,
    sample_count: AtomicI64,
    state: RwLock<NodeState>,
}

impl BreakdownNode {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measurement: AtomicF64::new(0.0),
            sample_count: AtomicI64::new(0),
            state: RwLock::new(NodeState::default()),
        }
    }

    /// A fresh `root` node
    #[must_use]
    pub fn root() -> Self {
        Self::new(ROOT_NAME)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn measurement(&self) -> f64 {
        self.measurement.load()
    }

    pub fn set_measurement(&self, value: f64) {
        self.measurement.store(value);
    }

    #[must_use]
    pub fn sample_count(&self) -> i64 {
        self.sample_count.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    #[must_use]
    pub fn find_child(&self, name: &str) -> Option<Arc<BreakdownNode>> {
        self.state.read().children.get(name).cloned()
    }

    /// Return the child called `name`, inserting an empty one if absent.
    ///
    /// Concurrent callers racing on the same name all receive the same node.
    pub fn get_or_create_child(&self, name: &str) -> Arc<BreakdownNode> {
        if let Some(child) = self.find_child(name) {
            return child;
        }

        let mut state = self.state.write();
        Arc::clone(
            state
                .children
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(BreakdownNode::new(name))),
        )
    }

    /// Attach `child`, replacing any sibling with the same name
    pub fn add_child(&self, child: Arc<BreakdownNode>) {
        self.state.write().children.insert(child.name.clone(), child);
    }

    /// Snapshot of the current children (unordered)
    #[must_use]
    pub fn children(&self) -> Vec<Arc<BreakdownNode>> {
        self.state.read().children.values().cloned().collect()
    }

    #[must_use]
    pub fn child_count(&self) -> usize {
        self.state.read().children.len()
    }

    /// Child with the largest measurement
    #[must_use]
    pub fn max_child(&self) -> Option<Arc<BreakdownNode>> {
        self.children().into_iter().max_by(|a, b| a.measurement().total_cmp(&b.measurement()))
    }

    /// Child with the smallest measurement
    #[must_use]
    pub fn min_child(&self) -> Option<Arc<BreakdownNode>> {
        self.children().into_iter().min_by(|a, b| a.measurement().total_cmp(&b.measurement()))
    }

    /// Number of levels in this subtree, counting this node
    #[must_use]
    pub fn depth(&self) -> usize {
        self.children().iter().map(|c| c.depth()).max().unwrap_or(0) + 1
    }

    // ------------------------------------------------------------------
    // Accumulation (hot path)
    // ------------------------------------------------------------------

    /// Add `value` to the measurement and `count` to the sample count
    pub fn increment(&self, value: f64, count: i64) {
        self.measurement.fetch_add(value);
        self.sample_count.fetch_add(count, Ordering::AcqRel);
    }

    /// Offer one duration to the percentile reservoir.
    ///
    /// The first [`RESERVOIR_SIZE`] values are kept as-is. After that the
    /// n-th value replaces a uniformly chosen slot with probability
    /// `RESERVOIR_SIZE / n`, so the reservoir stays a uniform sample of
    /// everything offered since the last evaluation.
    pub fn record_for_percentile(&self, value: f64) {
        {
            let mut state = self.state.write();
            state.offered += 1;
            if state.reservoir.len() < RESERVOIR_SIZE {
                if state.reservoir.capacity() == 0 {
                    state.reservoir.reserve_exact(RESERVOIR_SIZE);
                }
                state.reservoir.push(value);
            } else {
                let slot = rand::thread_rng().gen_range(0..state.offered);
                if let Some(existing) = usize::try_from(slot)
                    .ok()
                    .and_then(|slot| state.reservoir.get_mut(slot))
                {
                    *existing = value;
                }
            }
        }
        self.sample_count.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn reservoir_len(&self) -> usize {
        self.state.read().reservoir.len()
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Replace the measurement of every node holding reservoir values with
    /// the 95th percentile of those values, then clear the reservoir.
    pub fn evaluate_percentile(&self) {
        let children = {
            let mut state = self.state.write();
            if !state.reservoir.is_empty() {
                state.reservoir.sort_by(f64::total_cmp);
                let index = percentile_index(state.reservoir.len());
                if let Some(value) = state.reservoir.get(index) {
                    self.measurement.store(*value);
                }
                state.reservoir.clear();
                state.offered = 0;
            }
            state.children.values().cloned().collect::<Vec<_>>()
        };

        for child in children {
            child.evaluate_percentile();
        }
    }

    /// Post-order rollup: each node ends up holding its own value plus the
    /// final values of all its descendants.
    pub fn propagate(&self) {
        for child in self.children() {
            child.propagate();
            self.increment(child.measurement(), child.sample_count());
        }
    }

    /// Remove subtrees whose root measurement falls outside `[min, max]`.
    ///
    /// This node is depth 0; only children at depth `from_depth` or deeper
    /// are candidates for removal.
    pub fn filter_by_value(&self, from_depth: usize, min: f64, max: f64) {
        self.filter_level(1, from_depth, min, max);
    }

    fn filter_level(&self, level: usize, from_depth: usize, min: f64, max: f64) {
        let retained = {
            let mut state = self.state.write();
            if level >= from_depth {
                state.children.retain(|_, child| {
                    let m = child.measurement();
                    m >= min && m <= max
                });
            }
            state.children.values().cloned().collect::<Vec<_>>()
        };

        for child in retained {
            child.filter_level(level + 1, from_depth, min, max);
        }
    }

    /// Keep a child (and look inside it) only while `keep` accepts its name
    pub fn filter_by_name<F>(&self, keep: &F)
    where
        F: Fn(&str) -> bool + ?Sized,
    {
        let retained = {
            let mut state = self.state.write();
            state.children.retain(|name, _| keep(name.as_str()));
            state.children.values().cloned().collect::<Vec<_>>()
        };

        for child in retained {
            child.filter_by_name(keep);
        }
    }

    /// Rescale every measurement to a percentage of `total`
    pub fn convert_to_percentage(&self, total: f64) {
        self.measurement.store(self.measurement() / total * 100.0);
        for child in self.children() {
            child.convert_to_percentage(total);
        }
    }

    /// Multiply every measurement by `factor`, e.g. for unit conversion
    pub fn scale(&self, factor: f64) {
        self.measurement.store(self.measurement() * factor);
        for child in self.children() {
            child.scale(factor);
        }
    }

    /// Average accumulated sums over `factor` sub-windows
    pub fn normalize(&self, factor: f64) {
        self.measurement.store(self.measurement() / factor);
        let count = (self.sample_count() as f64 / factor).ceil() as i64;
        self.sample_count.store(count, Ordering::Release);
        for child in self.children() {
            child.normalize(factor);
        }
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Transport-ready copy of this subtree, children ordered by name
    #[must_use]
    pub fn to_record(&self) -> BreakdownRecord {
        let mut children = self.children();
        children.sort_by(|a, b| a.name.cmp(&b.name));

        BreakdownRecord {
            name: self.name.clone(),
            measurement: self.measurement(),
            sample_count: self.sample_count(),
            children: children.iter().map(|c| c.to_record()).collect(),
        }
    }

    fn fmt_level(&self, f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
        writeln!(
            f,
            "{:indent$}{} - {} ({})",
            "",
            self.name,
            self.measurement(),
            self.sample_count(),
            indent = level * 2
        )?;
        let mut children = self.children();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        for child in children {
            child.fmt_level(f, level + 1)?;
        }
        Ok(())
    }
}

/// Deep copy: fresh locks, copied values, recursively cloned children
impl Clone for BreakdownNode {
    fn clone(&self) -> Self {
        let state = self.state.read();
        let children = state
            .children
            .iter()
            .map(|(name, child)| (name.clone(), Arc::new(BreakdownNode::clone(child))))
            .collect();

        Self {
            name: self.name.clone(),
            measurement: AtomicF64::new(self.measurement()),
            sample_count: AtomicI64::new(self.sample_count()),
            state: RwLock::new(NodeState {
                children,
                reservoir: state.reservoir.clone(),
                offered: state.offered,
            }),
        }
    }
}

impl fmt::Display for BreakdownNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_level(f, 0)
    }
}

fn percentile_index(len: usize) -> usize {
    let index = (len as f64 * PERCENTILE).floor() as usize;
    index.min(len.saturating_sub(1))
}
