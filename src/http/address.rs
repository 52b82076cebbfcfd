//! IPv6 address parsing and rendering, spec §4.4.
//!
//! Built on `std::net::Ipv6Addr` rather than porting the original's manual nibble-by-nibble
//! parser (`examples/original_source/src/http.cpp`'s `Address::assign`): the standard
//! library already implements `::` elision and `::ffff:a.b.c.d` mapped-form parsing
//! correctly, it just doesn't accept a bare dotted-quad with no colons at all, which FastCGI
//! servers do sometimes hand over in `REMOTE_ADDR`/`SERVER_ADDR`. That one case is handled
//! before falling back to `Ipv6Addr::from_str`.

use std::net::Ipv6Addr;
use std::str::FromStr;

/// A 16-byte IPv6 address store, spec §3/§4.4. Wraps [`Ipv6Addr`] so the mixed
/// `::ffff:a.b.c.d` rendering rule can be enforced independent of how the standard library
/// chooses to format the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(Ipv6Addr);

impl Address {
    pub fn from_octets(octets: [u8; 16]) -> Self {
        Self(Ipv6Addr::from(octets))
    }

    pub fn octets(&self) -> [u8; 16] {
        self.0.octets()
    }

    /// Parses standard hex-colon IPv6, `::ffff:a.b.c.d` mapped form, or a bare
    /// `a.b.c.d` dotted quad (treated as IPv4-mapped).
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if !input.contains(':') && input.contains('.') {
            let v4: std::net::Ipv4Addr = input.parse().ok()?;
            return Some(Self(v4.to_ipv6_mapped()));
        }
        Ipv6Addr::from_str(input).ok().map(Self)
    }

    /// Renders with the longest run of zero groups collapsed to `::` (leftmost longest
    /// wins — `std::net::Ipv6Addr`'s `Display` already implements this rule), except that
    /// an IPv4-mapped address (first 10 bytes zero, next 2 bytes `0xffff`) is always
    /// rendered in the mixed `::ffff:a.b.c.d` form.
    pub fn render(&self) -> String {
        let octets = self.0.octets();
        if octets[..10] == [0u8; 10] && octets[10] == 0xff && octets[11] == 0xff {
            format!("::ffff:{}.{}.{}.{}", octets[12], octets[13], octets[14], octets[15])
        } else {
            self.0.to_string()
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl Default for Address {
    /// The zero address, spec §8 scenario 2: the fallback value for a `PARAMS` field that
    /// fails to parse.
    fn default() -> Self {
        Self::from_octets([0u8; 16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_form() {
        let a = Address::parse("2001:db8::1").unwrap();
        assert_eq!(a.render(), "2001:db8::1");
    }

    #[test]
    fn parses_bare_dotted_quad_as_mapped() {
        let a = Address::parse("192.0.2.1").unwrap();
        assert_eq!(a.render(), "::ffff:192.0.2.1");
    }

    #[test]
    fn parses_explicit_mapped_form() {
        let a = Address::parse("::ffff:192.0.2.1").unwrap();
        assert_eq!(a.render(), "::ffff:192.0.2.1");
    }

    #[test]
    fn renders_leftmost_longest_zero_run_as_double_colon() {
        // Groups 1:0:0:2:0:0:0:3 -- the longest zero run is the trailing triple (groups 4-6).
        let a = Address::from_octets([
            0, 1, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 3,
        ]);
        assert_eq!(a.render(), "1:0:0:2::3");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Address::parse("not-an-address").is_none());
    }

    #[test]
    fn default_is_the_zero_address() {
        assert_eq!(Address::default(), Address::from_octets([0u8; 16]));
    }
}
