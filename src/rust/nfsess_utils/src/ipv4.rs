use std::num::ParseIntError;

/// Parses an IPv4 address exported as an unsigned decimal integer
/// (nfdump's raw pipe format). Values at or above 2^31 are valid
/// addresses, so the field is never read as a signed number.
pub fn parse_addr(field: &str) -> Result<u32, ParseIntError> {
  field.trim().parse::<u32>()
}

/// Renders an unsigned IPv4 address in dotted-quad notation.
pub fn ntoa(ip: u32) -> String {
  format!(
    "{}.{}.{}.{}",
    (ip >> 24) & 0xFF,
    (ip >> 16) & 0xFF,
    (ip >> 8) & 0xFF,
    ip & 0xFF
  )
}
