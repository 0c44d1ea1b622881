// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-24

//! Periodic reconciliation of host facts into the object model.
//!
//! Every update interval the daemon enumerates network interfaces and
//! mounted volumes, refreshes the model, cleans expired messages, and
//! issues trigger-channel codes when the system clock or hostname drifted.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::code::{parse_line, CodeChannel, LineMeta};
use crate::context::Context;

/// Facts gathered about one network interface.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceFacts {
    /// Interface name, e.g. `eth0`.
    pub name: String,
    /// MAC address as reported by sysfs.
    pub mac: String,
    /// Link speed in Mbit/s, when exposed.
    pub speed: Option<u64>,
    /// Whether the interface is wireless (name prefix `w`).
    pub wifi: bool,
    /// WiFi signal level in dBm, when available.
    pub signal: Option<i32>,
    /// IPv4 address, when configured.
    pub address: Option<String>,
    /// IPv4 netmask, when configured.
    pub netmask: Option<String>,
    /// Default gateway, when this interface carries the default route.
    pub gateway: Option<String>,
    /// Configured DNS servers.
    pub dns: Vec<String>,
}

/// Facts gathered about one mounted volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeFacts {
    /// Mount point.
    pub mount: String,
    /// Backing device.
    pub device: String,
    /// Total capacity in bytes.
    pub capacity: u64,
    /// Free space in bytes.
    pub free: u64,
}

/// Run the periodic updater until shutdown.
pub async fn run_updater(ctx: Arc<Context>) -> Result<()> {
    let interval = Duration::from_millis(ctx.settings.host_update_interval_ms);
    let mut shutdown = ctx.shutdown.clone();
    let mut clock = ClockWatch::new();
    info!("host updater starting (every {interval:?})");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        update_once(&ctx, &mut clock).await;
    }
    info!("host updater stopped");
    Ok(())
}

async fn update_once(ctx: &Arc<Context>, clock: &mut ClockWatch) {
    let interfaces = collect_interfaces(Path::new("/sys/class/net"));
    ctx.model
        .set_property(
            &["network", "interfaces"],
            Value::Array(interfaces.iter().map(interface_json).collect()),
        )
        .await;

    let volumes = collect_volumes();
    ctx.model
        .set_property(
            &["volumes"],
            Value::Array(volumes.iter().map(volume_json).collect()),
        )
        .await;

    ctx.model
        .cleanup_messages(ctx.settings.max_message_age_s)
        .await;

    if let Some(host) = current_hostname() {
        let known = ctx.model.get().await["network"]["hostname"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if known != host {
            ctx.model
                .set_property(&["network", "hostname"], json!(host.clone()))
                .await;
            if !known.is_empty() {
                submit_trigger_code(ctx, &format!("M550 P\"{host}\""));
            }
        }
    }

    if clock.drifted(ctx.settings.max_time_drift_s) {
        warn!("system clock stepped; notifying firmware");
        let now = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let (date, time) = format_datetime(now);
        submit_trigger_code(ctx, &format!("M905 P\"{date}\" S\"{time}\""));
    }
}

fn submit_trigger_code(ctx: &Arc<Context>, text: &str) {
    let meta = LineMeta {
        channel: Some(CodeChannel::Trigger),
        ..LineMeta::default()
    };
    match parse_line(text, meta) {
        Ok(code) => {
            debug!("host updater submits {code}");
            // Fire and forget; the reply goes nowhere.
            let _ = ctx.scheduler.enqueue(code);
        }
        Err(err) => warn!("failed to build host code {text:?}: {err}"),
    }
}

/// Detects wall-clock steps by comparing against a monotonic reference.
struct ClockWatch {
    wall: SystemTime,
    mono: Instant,
}

impl ClockWatch {
    fn new() -> Self {
        Self {
            wall: SystemTime::now(),
            mono: Instant::now(),
        }
    }

    /// Whether the wall clock moved more than `tolerance` seconds away from
    /// the monotonic clock since the last call.
    fn drifted(&mut self, tolerance: f64) -> bool {
        let wall_elapsed = SystemTime::now()
            .duration_since(self.wall)
            .map(|d| d.as_secs_f64())
            .unwrap_or(-1.0);
        let mono_elapsed = self.mono.elapsed().as_secs_f64();
        self.wall = SystemTime::now();
        self.mono = Instant::now();
        (wall_elapsed - mono_elapsed).abs() > tolerance
    }
}

/// Split a Unix timestamp into `yyyy-MM-dd` and `HH:mm:ss` strings.
fn format_datetime(secs: u64) -> (String, String) {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    // Civil-from-days conversion for the proleptic Gregorian calendar.
    let z = days as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };

    (
        format!("{year:04}-{month:02}-{day:02}"),
        format!("{hour:02}:{minute:02}:{second:02}"),
    )
}

fn current_hostname() -> Option<String> {
    hostname::get().ok().map(|h| h.to_string_lossy().into_owned())
}

/// Enumerate non-loopback interfaces under `sys_net`.
fn collect_interfaces(sys_net: &Path) -> Vec<InterfaceFacts> {
    let Ok(entries) = fs::read_dir(sys_net) else {
        return Vec::new();
    };
    let gateways = fs::read_to_string("/proc/net/route")
        .map(|data| parse_default_routes(&data))
        .unwrap_or_default();
    let dns = fs::read_to_string("/etc/resolv.conf")
        .map(|data| parse_nameservers(&data))
        .unwrap_or_default();
    let wireless = fs::read_to_string("/proc/net/wireless")
        .map(|data| parse_wireless_signals(&data))
        .unwrap_or_default();
    let addresses = ipv4_addresses();

    let mut interfaces: Vec<InterfaceFacts> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "lo" {
                return None;
            }
            let mac = fs::read_to_string(entry.path().join("address"))
                .ok()?
                .trim()
                .to_string();
            let speed = fs::read_to_string(entry.path().join("speed"))
                .ok()
                .and_then(|s| s.trim().parse().ok());
            let wifi = name.starts_with('w');
            let signal = wireless.iter().find(|(n, _)| *n == name).map(|(_, s)| *s);
            let gateway = gateways.iter().find(|(n, _)| *n == name).map(|(_, g)| g.clone());
            let (address, netmask) = addresses
                .iter()
                .find(|(n, _, _)| *n == name)
                .map_or((None, None), |(_, addr, mask)| {
                    (Some(addr.clone()), Some(mask.clone()))
                });
            Some(InterfaceFacts {
                name,
                mac,
                speed,
                wifi,
                signal,
                address,
                netmask,
                gateway,
                dns: dns.clone(),
            })
        })
        .collect();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    interfaces
}

/// Enumerate `(interface, address, netmask)` triples for configured IPv4
/// addresses via `getifaddrs`.
fn ipv4_addresses() -> Vec<(String, String, String)> {
    let mut out = Vec::new();
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut addrs) } != 0 {
        return out;
    }
    let mut cursor = addrs;
    while !cursor.is_null() {
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;
        if entry.ifa_addr.is_null() || entry.ifa_netmask.is_null() {
            continue;
        }
        if unsafe { (*entry.ifa_addr).sa_family } != libc::AF_INET as libc::sa_family_t {
            continue;
        }
        let name = unsafe { std::ffi::CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();
        let addr = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
        let mask = unsafe { &*(entry.ifa_netmask as *const libc::sockaddr_in) };
        out.push((name, ipv4_string(addr), ipv4_string(mask)));
    }
    unsafe { libc::freeifaddrs(addrs) };
    out
}

fn ipv4_string(addr: &libc::sockaddr_in) -> String {
    // `s_addr` is stored in network byte order.
    let octets = addr.sin_addr.s_addr.to_ne_bytes();
    format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
}

/// Parse `(interface, gateway)` pairs for default routes out of
/// `/proc/net/route` content.
fn parse_default_routes(data: &str) -> Vec<(String, String)> {
    data.lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 || fields[1] != "00000000" {
                return None;
            }
            let raw = u32::from_str_radix(fields[2], 16).ok()?;
            let octets = raw.to_le_bytes();
            Some((
                fields[0].to_string(),
                format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]),
            ))
        })
        .collect()
}

/// Parse nameserver entries out of `resolv.conf` content.
fn parse_nameservers(data: &str) -> Vec<String> {
    data.lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("nameserver")
                .map(|rest| rest.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .collect()
}

/// Parse `(interface, signal_dbm)` pairs out of `/proc/net/wireless` content.
fn parse_wireless_signals(data: &str) -> Vec<(String, i32)> {
    data.lines()
        .skip(2)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let name = fields.first()?.trim_end_matches(':').to_string();
            let signal = fields.get(3)?.trim_end_matches('.').parse().ok()?;
            Some((name, signal))
        })
        .collect()
}

/// Enumerate mounted non-RAM filesystems with a positive total size.
fn collect_volumes() -> Vec<VolumeFacts> {
    let Ok(mounts) = fs::read_to_string("/proc/mounts") else {
        return Vec::new();
    };
    parse_mounts(&mounts)
        .into_iter()
        .filter_map(|(device, mount)| {
            let (capacity, free) = statvfs(&mount)?;
            if capacity == 0 {
                return None;
            }
            Some(VolumeFacts {
                mount,
                device,
                capacity,
                free,
            })
        })
        .collect()
}

/// Extract `(device, mountpoint)` pairs for disk-backed filesystems.
fn parse_mounts(data: &str) -> Vec<(String, String)> {
    const RAM_FS: &[&str] = &[
        "proc", "sysfs", "devtmpfs", "devpts", "tmpfs", "ramfs", "cgroup", "cgroup2", "overlay",
        "squashfs", "debugfs", "tracefs", "securityfs", "pstore", "bpf", "autofs", "mqueue",
        "hugetlbfs", "fusectl", "configfs",
    ];
    data.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (device, mount, fstype) = (*fields.first()?, *fields.get(1)?, *fields.get(2)?);
            if RAM_FS.contains(&fstype) {
                return None;
            }
            Some((device.to_string(), mount.replace("\\040", " ")))
        })
        .collect()
}

/// Total and free bytes of the filesystem at `mount`.
fn statvfs(mount: &str) -> Option<(u64, u64)> {
    let path = std::ffi::CString::new(mount).ok()?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stats) };
    if rc != 0 {
        return None;
    }
    let frsize = stats.f_frsize as u64;
    Some((stats.f_blocks as u64 * frsize, stats.f_bavail as u64 * frsize))
}

fn interface_json(interface: &InterfaceFacts) -> Value {
    json!({
        "name": interface.name,
        "mac": interface.mac,
        "speed": interface.speed,
        "type": if interface.wifi { "wifi" } else { "lan" },
        "signal": interface.signal,
        "actualIP": interface.address,
        "subnet": interface.netmask,
        "gateway": interface.gateway,
        "dnsServers": interface.dns,
    })
}

fn volume_json(volume: &VolumeFacts) -> Value {
    json!({
        "mounted": true,
        "path": volume.mount,
        "device": volume.device,
        "capacity": volume.capacity,
        "freeSpace": volume.free,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_route_parsing() {
        let data = "Iface\tDestination\tGateway\tFlags\n\
                    eth0\t00000000\t0100A8C0\t0003\n\
                    eth0\t0000A8C0\t00000000\t0001\n";
        let routes = parse_default_routes(data);
        assert_eq!(routes, vec![("eth0".to_string(), "192.168.0.1".to_string())]);
    }

    #[test]
    fn nameserver_parsing() {
        let data = "# generated\nnameserver 192.168.0.1\nnameserver 1.1.1.1\nsearch lan\n";
        assert_eq!(parse_nameservers(data), vec!["192.168.0.1", "1.1.1.1"]);
    }

    #[test]
    fn wireless_signal_parsing() {
        let data = "Inter-| sta-|   Quality        |   Discarded packets\n\
                    face | tus | link level noise |  nwid  crypt   frag\n\
                    wlan0: 0000   54.  -61.  -256        0      0      0\n";
        assert_eq!(parse_wireless_signals(data), vec![("wlan0".to_string(), -61)]);
    }

    #[test]
    fn mounts_skip_ram_filesystems() {
        let data = "proc /proc proc rw 0 0\n\
                    /dev/mmcblk0p2 / ext4 rw 0 0\n\
                    tmpfs /run tmpfs rw 0 0\n\
                    /dev/sda1 /mnt/usb\\040stick vfat rw 0 0\n";
        let mounts = parse_mounts(data);
        assert_eq!(
            mounts,
            vec![
                ("/dev/mmcblk0p2".to_string(), "/".to_string()),
                ("/dev/sda1".to_string(), "/mnt/usb stick".to_string()),
            ]
        );
    }

    #[test]
    fn clock_watch_tolerates_steady_clock() {
        let mut clock = ClockWatch::new();
        assert!(!clock.drifted(5.0));
    }

    #[test]
    fn datetime_formatting() {
        // 2026-08-02 12:34:56 UTC
        let (date, time) = format_datetime(1_785_674_096);
        assert_eq!(date, "2026-08-02");
        assert_eq!(time, "12:34:56");
    }
}
