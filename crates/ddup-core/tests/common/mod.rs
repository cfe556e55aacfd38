//! Shared test doubles for the contract tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ddup_core::error::Error;
use ddup_core::healthcheck::{Checker, ProbeOutcome};
use ddup_core::traits::DnsProvider;

pub fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

pub fn healthy(name: &str, addr: Ipv4Addr) -> ProbeOutcome {
    ProbeOutcome {
        endpoint: name.to_string(),
        ip: addr,
        healthy: true,
        error: None,
        duration: Duration::ZERO,
    }
}

pub fn unhealthy(name: &str, addr: Ipv4Addr) -> ProbeOutcome {
    ProbeOutcome {
        endpoint: name.to_string(),
        ip: addr,
        healthy: false,
        error: Some("connection failed".to_string()),
        duration: Duration::ZERO,
    }
}

/// Checker returning scripted probe rounds: each `check_all` call yields
/// the next round, and the last round repeats once the script runs out.
pub struct ScriptedChecker {
    domain: String,
    max_attempts: u32,
    rounds: Vec<Vec<ProbeOutcome>>,
    cursor: AtomicUsize,
}

impl ScriptedChecker {
    pub fn new(domain: &str, max_attempts: u32, rounds: Vec<Vec<ProbeOutcome>>) -> Self {
        assert!(!rounds.is_empty(), "scripted checker needs at least one round");
        Self {
            domain: domain.to_string(),
            max_attempts,
            rounds,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Convenience for a checker that returns the same round forever
    pub fn fixed(domain: &str, max_attempts: u32, round: Vec<ProbeOutcome>) -> Self {
        Self::new(domain, max_attempts, vec![round])
    }
}

#[async_trait]
impl Checker for ScriptedChecker {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn check_all(&self, _cancel: &CancellationToken) -> Vec<ProbeOutcome> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.rounds[index.min(self.rounds.len() - 1)].clone()
    }
}

/// Provider recording every `update_records` call; can be made to fail,
/// and tracks how many calls overlap in time.
pub struct RecordingProvider {
    name: String,
    fail: AtomicBool,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, u32, Vec<Ipv4Addr>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: AtomicBool::new(false),
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make every call take at least this long, to observe overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, u32, Vec<Ipv4Addr>)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsProvider for RecordingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_records(
        &self,
        domain: &str,
        ttl: u32,
        desired_ips: &[Ipv4Addr],
    ) -> ddup_core::Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls
            .lock()
            .push((domain.to_string(), ttl, desired_ips.to_vec()));

        if self.fail.load(Ordering::SeqCst) {
            Err(Error::provider(&self.name, "mock error"))
        } else {
            Ok(())
        }
    }
}
