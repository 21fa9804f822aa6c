//! IPv4 CIDR parsing and pool-address math (spec §4.9: "allocate pool IPs
//! skipping the first 11, reserved for static allocation + VIP").

use safescale_error::{ErrorKind, Result, SafeScaleError};
use safescale_types::RESERVED_POOL_ADDRESSES;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy)]
pub struct Cidr4 {
    pub network: u32,
    pub prefix: u8,
}

impl Cidr4 {
    pub fn parse(cidr: &str) -> Result<Self> {
        let (addr, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| SafeScaleError::invalid_request(format!("malformed CIDR: {cidr}")))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| SafeScaleError::invalid_request(format!("malformed CIDR address: {cidr}")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| SafeScaleError::invalid_request(format!("malformed CIDR prefix: {cidr}")))?;
        if prefix > 32 {
            return Err(SafeScaleError::invalid_request(format!("CIDR prefix out of range: {cidr}")));
        }
        let mask = Self::mask(prefix);
        Ok(Self { network: u32::from(addr) & mask, prefix })
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        }
    }

    pub fn host_count(&self) -> u32 {
        if self.prefix >= 32 {
            1
        } else {
            1u32 << (32 - self.prefix)
        }
    }

    fn addr_at(&self, offset: u32) -> Ipv4Addr {
        Ipv4Addr::from(self.network.wrapping_add(offset))
    }

    /// The `index`-th address available for static/pool allocation, skipping
    /// the network address, the first [`RESERVED_POOL_ADDRESSES`] usable
    /// addresses (reserved for gateways/VIP), and the broadcast address.
    pub fn pool_address(&self, index: u32) -> Result<Ipv4Addr> {
        let offset = 1 + RESERVED_POOL_ADDRESSES as u32 + index;
        if offset >= self.host_count().saturating_sub(1) {
            return Err(SafeScaleError::not_available(format!(
                "subnet {}/{} pool exhausted at index {index}",
                self.addr_at(0),
                self.prefix
            )));
        }
        Ok(self.addr_at(offset))
    }
}
