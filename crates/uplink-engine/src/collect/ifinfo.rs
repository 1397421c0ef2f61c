//! Low-level interface introspection shared by the collectors: address
//! resolution, byte counters, and wireless signal levels.

use std::net::Ipv4Addr;
use std::path::Path;

/// Resolve a network interface name (e.g. "wwan0") to its first IPv4
/// address. `None` when the interface does not exist or has no address —
/// collectors use this to fail fast instead of pinging through a dead
/// interface.
pub fn resolve_iface_ipv4(iface: &str) -> Option<Ipv4Addr> {
    if !Path::new(&format!("/sys/class/net/{iface}/")).exists() {
        return None;
    }

    // getifaddrs is the one reliable way to enumerate per-interface
    // addresses without parsing `ip` output.
    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut ifaddrs) != 0 {
            return None;
        }

        let mut current = ifaddrs;
        let mut result = None;

        while !current.is_null() {
            let ifa = &*current;
            if !ifa.ifa_addr.is_null() {
                let name = std::ffi::CStr::from_ptr(ifa.ifa_name).to_string_lossy();
                if name == iface && (*ifa.ifa_addr).sa_family == libc::AF_INET as u16 {
                    let addr = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                    result = Some(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)));
                    break;
                }
            }
            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
        result
    }
}

/// Interface byte counters from `/sys/class/net/<iface>/statistics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

pub fn read_iface_counters(iface: &str) -> Option<IfCounters> {
    let stat = |file: &str| -> Option<u64> {
        std::fs::read_to_string(format!("/sys/class/net/{iface}/statistics/{file}"))
            .ok()?
            .trim()
            .parse()
            .ok()
    };
    Some(IfCounters {
        rx_bytes: stat("rx_bytes")?,
        tx_bytes: stat("tx_bytes")?,
    })
}

/// Read the station signal level for a wireless interface from
/// `/proc/net/wireless`. `None` when the interface is not wireless.
pub fn read_wireless_dbm(iface: &str) -> Option<f64> {
    let contents = std::fs::read_to_string("/proc/net/wireless").ok()?;
    parse_wireless(&contents, iface)
}

/// Parse `/proc/net/wireless` content. After two header lines each row is
/// `iface: status link level noise ...`; the level field may carry a
/// trailing period.
pub(crate) fn parse_wireless(contents: &str, iface: &str) -> Option<f64> {
    for line in contents.lines().skip(2) {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(iface) {
            if let Some(rest) = rest.strip_prefix(':') {
                let fields: Vec<&str> = rest.split_whitespace().collect();
                if fields.len() >= 3 {
                    return fields[2].trim_end_matches('.').parse::<f64>().ok();
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_loopback_returns_127() {
        // `lo` exists on every Linux box
        assert_eq!(resolve_iface_ipv4("lo"), Some(Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn resolve_nonexistent_returns_none() {
        assert_eq!(resolve_iface_ipv4("does_not_exist_xyz99"), None);
    }

    #[test]
    fn loopback_counters_readable() {
        let counters = read_iface_counters("lo");
        assert!(counters.is_some());
    }

    #[test]
    fn parse_wireless_level() {
        let content = "\
Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE
 face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22
 wlan0: 0000   54.  -42.  -95.  0        0      0      0       0       0
 wlan1: 0000   30.  -75.  -100.  0        0      0      0       0       0";
        assert_eq!(parse_wireless(content, "wlan0"), Some(-42.0));
        assert_eq!(parse_wireless(content, "wlan1"), Some(-75.0));
        assert_eq!(parse_wireless(content, "wlan2"), None);
    }

    #[test]
    fn parse_wireless_skips_headers() {
        assert_eq!(parse_wireless("only\ntwo lines", "wlan0"), None);
    }
}
