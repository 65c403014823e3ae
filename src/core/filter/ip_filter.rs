//! IP filtering with CIDR support (`ipFilter`).
//!
//! Parameters: `whitelist` and `blacklist`, each a list of IPs or CIDR
//! networks. The blacklist wins; a non-empty whitelist rejects every address
//! not on it. Requests without a resolvable client address pass only when no
//! whitelist is configured.

use std::{net::IpAddr, str::FromStr};

use http::{StatusCode, request::Parts};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{FilterContext, RequestFilter};
use crate::core::policy::{PolicyError, Rejection, parse_params};

/// CIDR network representation
#[derive(Debug, Clone)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, String> {
        match addr {
            IpAddr::V4(_) if prefix_len > 32 => {
                return Err("IPv4 prefix length must be <= 32".to_string());
            }
            IpAddr::V6(_) if prefix_len > 128 => {
                return Err("IPv6 prefix length must be <= 128".to_string());
            }
            _ => {}
        }

        Ok(Self { addr, prefix_len })
    }

    /// Parse from CIDR notation (e.g., "192.168.1.0/24") or a bare address
    pub fn parse(s: &str) -> Result<Self, String> {
        if let Some((ip_str, prefix_str)) = s.split_once('/') {
            let addr = IpAddr::from_str(ip_str).map_err(|e| format!("Invalid IP address: {e}"))?;
            let prefix_len: u8 = prefix_str
                .parse()
                .map_err(|e| format!("Invalid prefix length: {e}"))?;
            Self::new(addr, prefix_len)
        } else {
            let addr = IpAddr::from_str(s).map_err(|e| format!("Invalid IP address: {e}"))?;
            let prefix_len = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            Ok(Self { addr, prefix_len })
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    !0u32 << (32 - self.prefix_len)
                };
                (u32::from(net) & mask) == (u32::from(addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    !0u128 << (128 - self.prefix_len)
                };
                (u128::from(net) & mask) == (u128::from(addr) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for IpNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IpNetwork::parse(s)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpFilterParams {
    #[serde(default)]
    whitelist: Vec<String>,
    #[serde(default)]
    blacklist: Vec<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

pub struct IpFilter {
    whitelist: Vec<IpNetwork>,
    blacklist: Vec<IpNetwork>,
    rejection: Rejection,
}

impl IpFilter {
    pub fn new(whitelist: Vec<IpNetwork>, blacklist: Vec<IpNetwork>) -> Self {
        Self {
            whitelist,
            blacklist,
            rejection: Rejection::new(StatusCode::FORBIDDEN, "Forbidden"),
        }
    }

    pub fn is_allowed(&self, ip: Option<IpAddr>) -> bool {
        let Some(ip) = ip else {
            return self.whitelist.is_empty();
        };
        if self.blacklist.iter().any(|net| net.contains(ip)) {
            return false;
        }
        self.whitelist.is_empty() || self.whitelist.iter().any(|net| net.contains(ip))
    }
}

impl RequestFilter for IpFilter {
    fn name(&self) -> &str {
        "ipFilter"
    }

    fn check(&self, _req: &Parts, ctx: &mut FilterContext<'_>) -> bool {
        let allowed = self.is_allowed(ctx.client_ip);
        if !allowed {
            tracing::debug!(client_ip = ?ctx.client_ip, "Client address blocked by ipFilter");
            ctx.reject(self.rejection.clone());
        }
        allowed
    }
}

/// Constructor registered under `ipFilter`.
pub fn build(params: &Map<String, Value>) -> Result<Box<dyn RequestFilter>, PolicyError> {
    let params: IpFilterParams = parse_params("ipFilter", params)?;
    let parse_list = |list: &[String]| {
        list.iter()
            .map(|s| {
                IpNetwork::parse(s).map_err(|message| PolicyError::InvalidParams {
                    kind: "ipFilter".to_string(),
                    message: format!("'{s}': {message}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()
    };

    let mut filter = IpFilter::new(
        parse_list(&params.whitelist)?,
        parse_list(&params.blacklist)?,
    );
    filter.rejection = super::builtin::rejection_from(
        "ipFilter",
        params.status,
        params.message,
        filter.rejection,
    )?;
    Ok(Box::new(filter))
}
