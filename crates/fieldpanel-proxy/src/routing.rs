//! Host-based selection of the trial a request belongs to.

use http::{header, HeaderMap, Uri};
use lazy_static::lazy_static;
use regex::Regex;

use fieldpanel_core::ProxyConfig;

lazy_static! {
    static ref TRIAL_HOST: Regex = Regex::new(r"^trial(\d+)\.").unwrap();
}

/// `trial7.example.com` -> 7.
pub fn trial_from_host(host: &str) -> Option<u32> {
    TRIAL_HOST
        .captures(host)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Where a request for one trial is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub trial: u32,
    pub port: u16,
}

impl Route {
    pub fn resolve(config: &ProxyConfig, headers: &HeaderMap, uri: &Uri) -> Option<Route> {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| uri.host())?;
        let trial = trial_from_host(host)?;
        let port = u16::try_from(trial)
            .ok()
            .and_then(|n| config.base_port.checked_add(n))?;
        Some(Route { trial, port })
    }
}
