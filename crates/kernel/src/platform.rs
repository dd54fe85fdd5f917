// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The simulated hardware platform: hosts, disks, links, and routes.
//!
//! The platform is populated programmatically before launch. Timing
//! models are deliberately simple: a network transfer costs the sum of
//! link latencies plus `bytes / (factor * min(bandwidth on path))`,
//! where the factor models TCP flows realising only ~92% of nominal
//! link bandwidth; a disk access costs `bytes / bandwidth`. Energy
//! integrates a linear wattage model over the active-core count.

use gantry_core::{parse_bandwidth, parse_bytes, parse_duration_secs, parse_flops, HostName};
use indexmap::IndexMap;
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlatformError {
    #[error("unknown host {0}")]
    UnknownHost(HostName),
    #[error("host {0} already declared")]
    DuplicateHost(HostName),
    #[error("unknown link {0:?}")]
    UnknownLink(SmolStr),
    #[error("no route between {from} and {to}")]
    NoRoute { from: HostName, to: HostName },
    #[error("host {0} is down")]
    HostDown(HostName),
    #[error(transparent)]
    Unit(#[from] gantry_core::UnitError),
}

/// A compute or storage host.
#[derive(Debug, Clone)]
pub struct Host {
    pub name: HostName,
    pub cores: u32,
    /// Per-core speed, flop/s.
    pub core_speed: f64,
    pub ram: u64,
    pub up: bool,
    /// Baseline draw when idle, watts.
    pub idle_watts: f64,
    /// Additional draw per busy core, watts.
    pub watts_per_core: f64,
    active_cores: u32,
    energy_joules: f64,
    energy_updated_at: f64,
}

impl Host {
    pub fn active_cores(&self) -> u32 {
        self.active_cores
    }

    fn integrate_energy(&mut self, now: f64) {
        let dt = (now - self.energy_updated_at).max(0.0);
        if self.up {
            self.energy_joules +=
                dt * (self.idle_watts + f64::from(self.active_cores) * self.watts_per_core);
        }
        self.energy_updated_at = now;
    }
}

/// A disk attached to a host at a mount point.
#[derive(Debug, Clone)]
pub struct Disk {
    pub host: HostName,
    pub mount: String,
    pub capacity: u64,
    /// Bytes/s for both directions unless overridden.
    pub read_bw: f64,
    pub write_bw: f64,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub name: SmolStr,
    /// Bytes/s.
    pub bandwidth: f64,
    /// Seconds.
    pub latency: f64,
}

/// A TCP flow only realises this share of a link's nominal bandwidth.
pub const DEFAULT_BANDWIDTH_FACTOR: f64 = 0.92;

/// The platform: built once, then owned by the kernel.
#[derive(Debug)]
pub struct Platform {
    hosts: IndexMap<HostName, Host>,
    disks: Vec<Disk>,
    links: IndexMap<SmolStr, Link>,
    /// Ordered link names per (src, dst) pair; symmetric routes must be
    /// added in both directions (or via `add_symmetric_route`).
    routes: IndexMap<(HostName, HostName), Vec<SmolStr>>,
    bandwidth_factor: f64,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            hosts: IndexMap::new(),
            disks: Vec::new(),
            links: IndexMap::new(),
            routes: IndexMap::new(),
            bandwidth_factor: DEFAULT_BANDWIDTH_FACTOR,
        }
    }
}

impl Platform {
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder { platform: Platform::default(), error: None }
    }

    pub fn host(&self, name: &HostName) -> Result<&Host, PlatformError> {
        self.hosts.get(name).ok_or_else(|| PlatformError::UnknownHost(name.clone()))
    }

    fn host_mut(&mut self, name: &HostName) -> Result<&mut Host, PlatformError> {
        self.hosts.get_mut(name).ok_or_else(|| PlatformError::UnknownHost(name.clone()))
    }

    pub fn host_names(&self) -> impl Iterator<Item = &HostName> {
        self.hosts.keys()
    }

    pub fn num_cores(&self, name: &HostName) -> Result<u32, PlatformError> {
        Ok(self.host(name)?.cores)
    }

    pub fn core_speed(&self, name: &HostName) -> Result<f64, PlatformError> {
        Ok(self.host(name)?.core_speed)
    }

    pub fn ram(&self, name: &HostName) -> Result<u64, PlatformError> {
        Ok(self.host(name)?.ram)
    }

    pub fn is_up(&self, name: &HostName) -> bool {
        self.hosts.get(name).map(|h| h.up).unwrap_or(false)
    }

    /// Disks mounted on `host`, in declaration order.
    pub fn disks_on<'a>(&'a self, host: &'a HostName) -> impl Iterator<Item = &'a Disk> + 'a {
        self.disks.iter().filter(move |d| &d.host == host)
    }

    /// The disk hosting `mount` on `host`.
    pub fn disk(&self, host: &HostName, mount: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| &d.host == host && d.mount == mount)
    }

    /// Seconds to move `bytes` from `from` to `to`: zero on the same
    /// host, otherwise latency sum plus `bytes / effective bandwidth`
    /// (the bottleneck link after the TCP bandwidth factor).
    pub fn network_time(
        &self,
        from: &HostName,
        to: &HostName,
        bytes: u64,
    ) -> Result<f64, PlatformError> {
        if !self.is_up(from) {
            return Err(PlatformError::HostDown(from.clone()));
        }
        if !self.is_up(to) {
            return Err(PlatformError::HostDown(to.clone()));
        }
        if from == to {
            return Ok(0.0);
        }
        let route = self
            .routes
            .get(&(from.clone(), to.clone()))
            .ok_or_else(|| PlatformError::NoRoute { from: from.clone(), to: to.clone() })?;
        let mut latency = 0.0;
        let mut min_bw = f64::INFINITY;
        for name in route {
            let link =
                self.links.get(name).ok_or_else(|| PlatformError::UnknownLink(name.clone()))?;
            latency += link.latency;
            min_bw = min_bw.min(link.bandwidth);
        }
        let effective = min_bw * self.bandwidth_factor;
        let transfer = if bytes == 0 || effective.is_infinite() {
            0.0
        } else {
            bytes as f64 / effective
        };
        Ok(latency + transfer)
    }

    /// Effective bottleneck bandwidth between two hosts (bytes/s);
    /// infinite on the same host.
    pub fn path_bandwidth(&self, from: &HostName, to: &HostName) -> Result<f64, PlatformError> {
        if from == to {
            return Ok(f64::INFINITY);
        }
        let route = self
            .routes
            .get(&(from.clone(), to.clone()))
            .ok_or_else(|| PlatformError::NoRoute { from: from.clone(), to: to.clone() })?;
        let mut min_bw = f64::INFINITY;
        for name in route {
            let link =
                self.links.get(name).ok_or_else(|| PlatformError::UnknownLink(name.clone()))?;
            min_bw = min_bw.min(link.bandwidth);
        }
        Ok(min_bw * self.bandwidth_factor)
    }

    /// Record a change in busy cores on `host`, integrating energy up to
    /// `now` first.
    pub fn set_active_cores(
        &mut self,
        host: &HostName,
        cores: u32,
        now: f64,
    ) -> Result<(), PlatformError> {
        let h = self.host_mut(host)?;
        h.integrate_energy(now);
        h.active_cores = cores;
        Ok(())
    }

    /// Relative busy-core change (services sharing a host each add their
    /// own reservations).
    pub fn adjust_active_cores(
        &mut self,
        host: &HostName,
        delta: i64,
        now: f64,
    ) -> Result<(), PlatformError> {
        let h = self.host_mut(host)?;
        h.integrate_energy(now);
        let cores = i64::from(h.active_cores) + delta;
        h.active_cores = cores.clamp(0, i64::from(h.cores)) as u32;
        Ok(())
    }

    /// Joules consumed by `host` up to `now`.
    pub fn energy_consumed(&mut self, host: &HostName, now: f64) -> Result<f64, PlatformError> {
        let h = self.host_mut(host)?;
        h.integrate_energy(now);
        Ok(h.energy_joules)
    }

    pub fn set_host_down(&mut self, host: &HostName, now: f64) -> Result<(), PlatformError> {
        let h = self.host_mut(host)?;
        h.integrate_energy(now);
        h.up = false;
        Ok(())
    }

    pub fn set_host_up(&mut self, host: &HostName, now: f64) -> Result<(), PlatformError> {
        let h = self.host_mut(host)?;
        h.integrate_energy(now);
        h.up = true;
        Ok(())
    }
}

/// Fluent platform construction; the first error sticks and is returned
/// by `build()`.
pub struct PlatformBuilder {
    platform: Platform,
    error: Option<PlatformError>,
}

impl PlatformBuilder {
    /// Add a host. `speed` and `ram` accept SI suffixes (`"1Gf"`,
    /// `"16GB"`).
    pub fn host(mut self, name: &str, speed: &str, cores: u32, ram: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        let name = HostName::new(name);
        if self.platform.hosts.contains_key(&name) {
            self.error = Some(PlatformError::DuplicateHost(name));
            return self;
        }
        let (core_speed, ram) = match (parse_flops(speed), parse_bytes(ram)) {
            (Ok(s), Ok(r)) => (s, r),
            (Err(e), _) | (_, Err(e)) => {
                self.error = Some(e.into());
                return self;
            }
        };
        self.platform.hosts.insert(
            name.clone(),
            Host {
                name,
                cores,
                core_speed,
                ram,
                up: true,
                idle_watts: 0.0,
                watts_per_core: 0.0,
                active_cores: 0,
                energy_joules: 0.0,
                energy_updated_at: 0.0,
            },
        );
        self
    }

    /// Set the wattage model of the most recently added host.
    pub fn wattage(mut self, idle_watts: f64, watts_per_core: f64) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Some((_, h)) = self.platform.hosts.last_mut() {
            h.idle_watts = idle_watts;
            h.watts_per_core = watts_per_core;
        }
        self
    }

    /// Attach a disk to `host`. `size` takes SI suffixes, `bw` is e.g.
    /// `"100MBps"` for both directions.
    pub fn disk(mut self, host: &str, mount: &str, size: &str, bw: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        let (capacity, bandwidth) = match (parse_bytes(size), parse_bandwidth(bw)) {
            (Ok(c), Ok(b)) => (c, b),
            (Err(e), _) | (_, Err(e)) => {
                self.error = Some(e.into());
                return self;
            }
        };
        self.platform.disks.push(Disk {
            host: HostName::new(host),
            mount: gantry_core::canonical_path(mount),
            capacity,
            read_bw: bandwidth,
            write_bw: bandwidth,
        });
        self
    }

    /// Declare a link; `bw` like `"125MBps"`, `latency` like `"100us"`.
    pub fn link(mut self, name: &str, bw: &str, latency: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        let (bandwidth, latency) = match (parse_bandwidth(bw), parse_duration_secs(latency)) {
            (Ok(b), Ok(l)) => (b, l),
            (Err(e), _) | (_, Err(e)) => {
                self.error = Some(e.into());
                return self;
            }
        };
        self.platform.links.insert(
            SmolStr::new(name),
            Link { name: SmolStr::new(name), bandwidth, latency },
        );
        self
    }

    /// Override the TCP bandwidth factor (1.0 charges transfers at a
    /// link's nominal bandwidth).
    pub fn bandwidth_factor(mut self, factor: f64) -> Self {
        self.platform.bandwidth_factor = factor;
        self
    }

    /// Route `from -> to` over the named links, and the reverse route
    /// over the same links.
    pub fn route(mut self, from: &str, to: &str, links: &[&str]) -> Self {
        if self.error.is_some() {
            return self;
        }
        let names: Vec<SmolStr> = links.iter().map(|l| SmolStr::new(l)).collect();
        self.platform
            .routes
            .insert((HostName::new(from), HostName::new(to)), names.clone());
        self.platform.routes.insert((HostName::new(to), HostName::new(from)), names);
        self
    }

    pub fn build(self) -> Result<Platform, PlatformError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.platform),
        }
    }
}

#[cfg(test)]
#[path = "platform_tests.rs"]
mod tests;
