//! Resolvable `(hostname, port)` pairs for peer configuration.

use cvat_core::Expr;

/// Where a service or backend can be reached.
///
/// Either part may be deferred: backend addresses are provider-assigned,
/// and some ports (the cache endpoint port) are only known after
/// deployment. The combined socket address is then a deferred join, not
/// a synthesis failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub hostname: Expr,
    pub port: Expr,
}

impl Endpoint {
    pub fn new(hostname: impl Into<Expr>, port: impl Into<Expr>) -> Self {
        Self {
            hostname: hostname.into(),
            port: port.into(),
        }
    }

    /// `HOSTNAME:PORT`.
    pub fn socket_address(&self) -> Expr {
        Expr::concat([self.hostname.clone(), Expr::str(":"), self.port.clone()])
    }

    /// The port as a string value, for environment variables.
    pub fn port_string(&self) -> Expr {
        Expr::concat([self.port.clone()])
    }

    /// The port when it is known at synthesis time.
    pub fn literal_port(&self) -> Option<u16> {
        match self.port {
            Expr::Int(n) => u16::try_from(n).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_socket_address() {
        let e = Endpoint::new("server.cvat.internal", 8080u16);
        assert_eq!(e.socket_address(), Expr::str("server.cvat.internal:8080"));
        assert_eq!(e.port_string(), Expr::str("8080"));
        assert_eq!(e.literal_port(), Some(8080));
    }

    #[test]
    fn deferred_port_socket_address() {
        let e = Endpoint::new(
            Expr::att("Redis", "RedisEndpoint.Address"),
            Expr::att("Redis", "RedisEndpoint.Port"),
        );
        let addr = e.socket_address();
        assert!(addr.is_deferred());
        assert_eq!(e.literal_port(), None);
        match addr {
            Expr::Join(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected join, got {other:?}"),
        }
    }
}
