// Device address enumeration from the configured range
use super::machine::MachineAddress;

/// Build one address per number in `[start, end]`, in order.
/// Position `k` in the result is machine index `k`.
pub fn enumerate_addresses(prefix: &str, start: u16, end: u16, port: u16) -> Vec<MachineAddress> {
    (start..=end)
        .map(|n| MachineAddress::new(format!("{}{}", prefix, n), port))
        .collect()
}
