//! Load-aware peer selection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use time::{Duration, OffsetDateTime};

use common::node_id::NodeId;

use crate::clock::Clock;

/// Reports older than this are ignored during selection
pub const METRICS_MAX_AGE: Duration = Duration::minutes(2);

/// Chooses peers to receive healing pushes.
pub trait PeerSelector: Send + Sync + 'static {
    /// Pick up to `n` peers, skipping everything in `exclude`.
    fn select(&self, n: usize, exclude: &[NodeId]) -> Vec<NodeId>;
}

/// One node's most recent resource report.
#[derive(Debug, Clone)]
pub struct NodeLoad {
    pub load: u32,
    pub cpu: f64,
    pub mem: f64,
    updated: OffsetDateTime,
}

impl NodeLoad {
    /// Composite pressure score; lower is a better replication target.
    fn score(&self) -> f64 {
        0.4 * f64::from(self.load) + 0.3 * self.cpu + 0.3 * self.mem
    }
}

/// Peer selector ranking nodes by their reported load.
///
/// Nodes push `{load, cpu, mem}` reports via [`LoadBalancer::update_metrics`];
/// selection ranks fresh reports by score and breaks ties on the lexical
/// node id so results are stable under test.
pub struct LoadBalancer {
    clock: Arc<dyn Clock>,
    nodes: Mutex<HashMap<NodeId, NodeLoad>>,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer").finish()
    }
}

impl LoadBalancer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, NodeLoad>> {
        match self.nodes.lock() {
            Ok(guard) => guard,
            Err(p) => p.into_inner(),
        }
    }

    /// Ingest a node's resource report.
    pub fn update_metrics(&self, node: NodeId, load: u32, cpu: f64, mem: f64) {
        let now = self.clock.now();
        self.lock().insert(
            node,
            NodeLoad {
                load,
                cpu,
                mem,
                updated: now,
            },
        );
    }

    /// Number of nodes with a fresh report.
    pub fn active_nodes(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .values()
            .filter(|n| now - n.updated < METRICS_MAX_AGE)
            .count()
    }
}

impl PeerSelector for LoadBalancer {
    fn select(&self, n: usize, exclude: &[NodeId]) -> Vec<NodeId> {
        let now = self.clock.now();
        let guard = self.lock();

        let mut active: Vec<(&NodeId, &NodeLoad)> = guard
            .iter()
            .filter(|(id, load)| now - load.updated < METRICS_MAX_AGE && !exclude.contains(id))
            .collect();

        active.sort_by(|(a_id, a), (b_id, b)| {
            a.score()
                .partial_cmp(&b.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_id.cmp(b_id))
        });

        active.into_iter().take(n).map(|(id, _)| id.clone()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::ManualClock;
    use time::macros::datetime;

    fn balancer() -> (LoadBalancer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC)));
        (LoadBalancer::new(clock.clone()), clock)
    }

    #[test]
    fn test_selects_lowest_score_first() {
        let (lb, _clock) = balancer();
        lb.update_metrics(NodeId::from("busy"), 100, 0.9, 0.9);
        lb.update_metrics(NodeId::from("idle"), 1, 0.1, 0.1);
        lb.update_metrics(NodeId::from("mid"), 50, 0.5, 0.5);

        let picked = lb.select(2, &[]);
        assert_eq!(picked, vec![NodeId::from("idle"), NodeId::from("mid")]);
    }

    #[test]
    fn test_stale_reports_are_ignored() {
        let (lb, clock) = balancer();
        lb.update_metrics(NodeId::from("stale"), 0, 0.0, 0.0);
        clock.advance(Duration::minutes(3));
        lb.update_metrics(NodeId::from("fresh"), 99, 0.9, 0.9);

        assert_eq!(lb.select(2, &[]), vec![NodeId::from("fresh")]);
        assert_eq!(lb.active_nodes(), 1);
    }

    #[test]
    fn test_exclusion_and_lexical_tiebreak() {
        let (lb, _clock) = balancer();
        lb.update_metrics(NodeId::from("b"), 1, 0.1, 0.1);
        lb.update_metrics(NodeId::from("a"), 1, 0.1, 0.1);
        lb.update_metrics(NodeId::from("c"), 1, 0.1, 0.1);

        let picked = lb.select(2, &[NodeId::from("a")]);
        assert_eq!(picked, vec![NodeId::from("b"), NodeId::from("c")]);
    }

    #[test]
    fn test_fewer_nodes_than_requested() {
        let (lb, _clock) = balancer();
        lb.update_metrics(NodeId::from("only"), 1, 0.1, 0.1);
        assert_eq!(lb.select(5, &[]), vec![NodeId::from("only")]);
    }
}
