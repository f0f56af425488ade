//! Local peer discovery (spec.md §6 "Discovery protocol"): advertise and
//! browse for other instances willing to serve cached implementations
//! over the local network, so a fetch can fall back to a nearby peer
//! before hitting a remote mirror. Grounded in `mdns-sd`'s federation use
//! in `ConaryLabs-Conary`.
//!
//! This module only owns the UDP multicast announce/browse half of the
//! protocol. The HTTP responder that actually streams
//! `http://<peer>:<port>/<digest>.zip` lives in `zeroinstall-engine`,
//! which is where the implementation store and archive builder already
//! are.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::errors::{NativeError, Result};

const SERVICE_TYPE: &str = "_0install._udp.local.";

/// One peer discovered on the local network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    /// The peer's advertised instance name, usually a UUID.
    pub id: String,
    /// Host the peer's HTTP responder is reachable on.
    pub host: String,
    /// Port the peer's HTTP responder listens on.
    pub port: u16,
}

impl Peer {
    /// The URL to fetch `store_name` (a manifest digest's store name)
    /// from this peer, per spec.md §6's `http://<peer>:<port>/<digest>.zip`.
    pub fn archive_url(&self, store_name: &str) -> String {
        format!("http://{}:{}/{}.zip", self.host, self.port, store_name)
    }
}

/// Advertises this instance on the local network and browses for others.
/// One per process; dropping it withdraws the advertisement.
pub struct PeerDiscovery {
    daemon: ServiceDaemon,
    instance_id: String,
}

impl PeerDiscovery {
    /// Start the mDNS daemon. Does not yet advertise or browse; call
    /// [`PeerDiscovery::announce`] and [`PeerDiscovery::browse`].
    pub fn start() -> Result<PeerDiscovery> {
        let daemon = ServiceDaemon::new()?;
        Ok(PeerDiscovery {
            daemon,
            instance_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Advertise that this instance's HTTP responder is serving on `port`.
    pub fn announce(&self, port: u16) -> Result<()> {
        let host = format!("{}.local.", self.instance_id);
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &self.instance_id,
            &host,
            "",
            port,
            None::<HashMap<String, String>>,
        )
        .map_err(NativeError::DiscoveryUnavailable)?;
        self.daemon
            .register(info)
            .map_err(NativeError::DiscoveryUnavailable)
    }

    /// Collect the peers currently visible, waiting no longer than a
    /// single browse cycle. Callers that want a live feed should consult
    /// `mdns_sd`'s receiver directly; this is the simple one-shot poll
    /// the fetcher's peer fallback uses.
    pub fn browse_once(&self) -> Result<Vec<Peer>> {
        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(NativeError::DiscoveryUnavailable)?;
        let mut peers = Vec::new();
        while let Ok(event) = receiver.recv_timeout(std::time::Duration::from_secs(2)) {
            if let ServiceEvent::ServiceResolved(info) = event {
                if info.get_fullname().starts_with(&self.instance_id) {
                    continue;
                }
                if let Some(addr) = info.get_addresses().iter().next() {
                    peers.push(Peer {
                        id: info.get_fullname().to_owned(),
                        host: addr.to_string(),
                        port: info.get_port(),
                    });
                }
            }
        }
        Ok(peers)
    }
}
