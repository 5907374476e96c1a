use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

/// An IPv4 or IPv6 endpoint with an optional port.
///
/// Port 0 means "no port": such addresses format as the bare IP and are
/// completed by the resolver or the caller before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    ip: IpAddr,
    port: u16,
}

impl Address {
    /// Creates an address from an IP and port.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Returns the IP part.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Returns the port, 0 if none was given.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Replaces the port.
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Returns true for IPv6 addresses.
    pub fn is_ipv6(&self) -> bool {
        matches!(self.ip, IpAddr::V6(_))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self { ip: addr.ip(), port: addr.port() }
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        SocketAddr::new(addr.ip, addr.port)
    }
}

/// Failure to parse an address string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid address: {}", self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Accepts `"127.0.0.1"`, `"127.0.0.1:8080"`, `"::1"`, and
    /// `"[::1]:8080"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(socket_addr) = SocketAddr::from_str(s) {
            return Ok(socket_addr.into());
        }
        if let Ok(ip) = IpAddr::from_str(s) {
            return Ok(Self { ip, port: 0 });
        }
        Err(AddressParseError(s.to_owned()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == 0 {
            return write!(f, "{}", self.ip);
        }
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let address: Address = "127.0.0.1".parse().unwrap();
        assert!(!address.is_ipv6());
        assert_eq!(address.port(), 0);
        assert_eq!(address.to_string(), "127.0.0.1");

        let address: Address = "10.0.0.2:4000".parse().unwrap();
        assert_eq!(address.port(), 4000);
        assert_eq!(address.to_string(), "10.0.0.2:4000");
    }

    #[test]
    fn test_parse_ipv6() {
        let address: Address = "::1".parse().unwrap();
        assert!(address.is_ipv6());
        assert_eq!(address.port(), 0);
        assert_eq!(address.to_string(), "::1");

        let address: Address = "[::1]:4000".parse().unwrap();
        assert_eq!(address.port(), 4000);
        assert_eq!(address.to_string(), "[::1]:4000");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not an address".parse::<Address>().is_err());
        assert!("300.1.2.3".parse::<Address>().is_err());
    }

    #[test]
    fn test_socket_addr_round_trip() {
        let address: Address = "[fe80::1]:9000".parse().unwrap();
        let socket_addr: SocketAddr = address.into();
        assert_eq!(Address::from(socket_addr), address);
    }

    #[test]
    fn test_set_port() {
        let mut address: Address = "::1".parse().unwrap();
        address.set_port(40000);
        assert_eq!(address.to_string(), "[::1]:40000");
    }
}
