pub(crate) mod params;
pub mod poll;

/// Seed assigned when the caller does not supply one, echoed back in the
/// result so a generation can be reproduced.
pub(crate) fn random_seed() -> u64 {
    let mut bytes = [0u8; 8];
    if getrandom::fill(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes) % 1_000_000
}
