//! Wi-Fi collector: ping through the interface, with station signal read
//! from `/proc/net/wireless` when the kernel exposes it. A single path by
//! design; "partial" just means no signal was available.

use uplink_common::models::{CollectionMethod, Member, Metrics};

use super::ifinfo::read_wireless_dbm;
use super::ping::{metrics_from_ping, PingProbe};
use super::CollectError;

pub struct WifiCollector {
    ping: PingProbe,
}

impl WifiCollector {
    pub fn new(ping: PingProbe) -> Self {
        WifiCollector { ping }
    }

    pub async fn collect(&self, member: &Member) -> Result<Metrics, CollectError> {
        let outcome = self.ping.probe(member).await?;
        let mut m = metrics_from_ping(&outcome, CollectionMethod::FallbackPing);
        m.signal_dbm = read_wireless_dbm(&member.iface);
        Ok(m)
    }
}
