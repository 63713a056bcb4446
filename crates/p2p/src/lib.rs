//! Peer-to-peer plumbing for the block store.
//!
//! The engine never talks to a network directly; it consumes the
//! capabilities defined here ([`Dht`], [`PeerSelector`], [`Clock`],
//! [`GossipTransport`]) and ships two background components on top of
//! them: the self-healing [`Replicator`] and the advisory
//! [`GossipAlerter`]. In-memory fakes of every capability live in
//! [`testkit`].

mod balancer;
mod clock;
mod dht;
mod gossip;
mod replicator;
pub mod testkit;

pub use balancer::{LoadBalancer, NodeLoad, PeerSelector, METRICS_MAX_AGE};
pub use clock::{Clock, SystemClock};
pub use dht::{record_key, Dht, DhtError, DHT_GET_TIMEOUT, DHT_PUT_TIMEOUT};
pub use gossip::{
    AlertDispatcher, BlockAlert, GossipAlerter, GossipConfig, GossipTransport, GOSSIP_PROTOCOL,
    PEER_REFRESH_INTERVAL, REPLICA_ALERT,
};
pub use replicator::{PendingDeletions, Replicator, ReplicatorConfig, MIN_REPLICAS};
