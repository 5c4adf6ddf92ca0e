//! End-to-end scenarios: reflector + greedy policy against emulated motes.

use super::*;
use crate::communicator::Outbox;
use crate::config::{ControllerConfig, PolicyConfig};
use crate::node::testing::node;
use crate::node::NodeId;
use crate::policy::GreedyPolicy;
use crate::reflector::{Hooks, Reflector};

const B: &str = "Broadcast-Frame";
const U: &str = "Unicast-Frame";

fn simulation(config: SimulationConfig, policy: PolicyConfig) -> MeshSimulation<GreedyPolicy> {
    let cfg = ControllerConfig::default();
    let metrics = policy.metrics.clone();
    let reflector = Reflector::new(cfg.mesh().unwrap(), Outbox::new(), GreedyPolicy::new(B, U, policy))
        .with_churn(cfg.churn_settings());
    let mut sim = MeshSimulation::new(reflector, config);
    sim.start(cfg.slotframes(), B, &metrics).unwrap();
    sim
}

fn reliable() -> MeshSimulation<GreedyPolicy> {
    simulation(SimulationConfig::default(), PolicyConfig::default())
}

/// Every mote holds exactly the cells the controller believes it owns, and
/// every one of them has been acknowledged.
fn assert_mirrors_motes<H: Hooks>(sim: &MeshSimulation<H>) {
    let mesh = sim.reflector().mesh();
    for mote in sim.motes() {
        let mut remote: Vec<(u8, u16, u8)> = mote.cells().map(|(_, c)| (c.frame, c.slot, c.channel)).collect();
        remote.sort();

        let mut local = Vec::new();
        for frame in mesh.frames() {
            for cell in frame.cells().iter().filter(|c| c.owner == mote.id()) {
                let alias = frame.alias_id(mote.id()).expect("frame installed before its cells");
                assert!(cell.is_confirmed(), "unconfirmed cell {}", cell);
                local.push((alias, cell.slot, cell.channel));
            }
        }
        local.sort();
        assert_eq!(remote, local, "cell tables diverge on {}", mote.id());
    }
}

fn mentions(sim: &MeshSimulation<GreedyPolicy>, node: NodeId) -> usize {
    sim.reflector()
        .mesh()
        .frames()
        .flat_map(|f| f.cells().iter())
        .filter(|c| c.owner == node || c.tx == node || c.rx == Some(node))
        .count()
}

#[test]
fn test_border_router_bootstrap() {
    let mut sim = reliable();
    sim.run_until(30);

    let root = sim.mote(node(0)).unwrap();
    assert_eq!(root.frames().len(), 2);
    assert_eq!(root.cell_count(), 1);
    // Children observe plus the statistics observe.
    assert_eq!(root.observer_count(), 2);
    assert_mirrors_motes(&sim);
    assert_eq!(sim.stats().failures, 0);
}

#[test]
fn test_chain_join_installs_schedule() {
    let mut sim = reliable();
    sim.join(10, node(1), node(0));
    sim.join(60, node(2), node(1));
    sim.run_until(200);

    let mesh = sim.reflector().mesh();
    assert_eq!(mesh.topology().len(), 3);
    assert_eq!(mesh.topology().depth(node(2)), Some(2));
    for n in [node(1), node(2)] {
        assert_eq!(sim.mote(n).unwrap().frames().len(), 2);
    }
    // One dedicated cell per direction with the parent.
    for (a, b) in [(node(1), node(0)), (node(2), node(1))] {
        assert_eq!(mesh.get_link_by_endpoints(U, a, Some(b)).unwrap().len(), 2);
        assert_eq!(mesh.get_link_by_endpoints(U, b, Some(a)).unwrap().len(), 2);
    }
    assert_mirrors_motes(&sim);
    assert_eq!(sim.stats().failures, 0);
    assert_eq!(sim.stats().unanswered, 0);
}

#[test]
fn test_departed_node_is_purged_after_countdown() {
    let mut sim = reliable();
    sim.join(10, node(1), node(0));
    sim.join(60, node(2), node(1));
    sim.leave(150, node(2));

    sim.run_until(200);
    let lost: Vec<_> = sim.reflector().lost_children().collect();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].0, node(2));
    assert!(sim.reflector().mesh().topology().contains(node(2)));

    // 30 ticks of 10 virtual units each.
    sim.run_until(700);
    assert!(!sim.reflector().mesh().topology().contains(node(2)));
    assert_eq!(sim.stats().disconnects, 1);
    assert_eq!(mentions(&sim, node(2)), 0);
    // The probe and the departed node's own deletes went nowhere.
    assert!(sim.stats().unanswered > 0);
    assert_mirrors_motes(&sim);
}

#[test]
fn test_rewire_moves_unicast_links() {
    let mut sim = reliable();
    sim.join(10, node(1), node(0));
    sim.join(40, node(2), node(0));
    sim.join(80, node(3), node(1));
    sim.rewire(150, node(3), node(2));
    sim.run_until(300);

    let mesh = sim.reflector().mesh();
    assert_eq!(mesh.topology().parent(node(3)), Some(node(2)));
    assert_eq!(sim.reflector().lost_children().count(), 0);
    assert!(mesh.get_link_by_endpoints(U, node(3), Some(node(1))).unwrap().is_empty());
    assert!(mesh.get_link_by_endpoints(U, node(1), Some(node(3))).unwrap().is_empty());
    assert_eq!(mesh.get_link_by_endpoints(U, node(3), Some(node(2))).unwrap().len(), 2);
    assert_eq!(mesh.get_link_by_endpoints(U, node(2), Some(node(3))).unwrap().len(), 2);
    assert_eq!(sim.stats().disconnects, 0);
    assert_mirrors_motes(&sim);
}

#[test]
fn test_bad_link_gets_blacklisted() {
    let config = SimulationConfig {
        report_interval: 20,
        ..SimulationConfig::default()
    };
    let policy = PolicyConfig {
        statistics_period: 5,
        ..PolicyConfig::default()
    };
    let mut sim = simulation(config, policy);
    sim.network_mut().set_link_quality(node(1), node(0), 0.1);
    sim.join(10, node(1), node(0));
    sim.run_until(300);

    assert!(sim.reflector().hooks().blacklisted_links() >= 1);
    let mesh = sim.reflector().mesh();
    let frame = mesh.frame(U).unwrap();
    let blacklisted: Vec<_> = frame.blacklisted().collect();
    assert!(!blacklisted.is_empty());
    for (slot, channel) in &blacklisted {
        assert!(mesh.get_link_by_coords(U, *slot, *channel).unwrap().is_empty());
    }
    let link = mesh.get_link_by_endpoints(U, node(1), Some(node(0))).unwrap();
    assert_eq!(link.len(), 2);
}

#[test]
fn test_same_seed_same_run() {
    fn run(seed: u64) -> (SimulationStats, NetworkCounters, usize, usize) {
        let config = SimulationConfig {
            seed,
            network: NetworkConfig::lossy(2, 4, 0.1),
            ..SimulationConfig::default()
        };
        let mut sim = simulation(config, PolicyConfig::default());
        for i in 1..6 {
            sim.join(10 * i, node(i), node((i - 1) / 2));
        }
        sim.leave(200, node(4));
        sim.run_until(800);
        (
            sim.stats(),
            sim.network().counters(),
            sim.reflector().mesh().topology().len(),
            sim.reflector().in_flight(),
        )
    }

    assert_eq!(run(7), run(7));
    assert!(run(7).1.dropped_by_chance > 0);
}
