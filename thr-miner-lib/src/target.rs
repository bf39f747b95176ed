use std::fmt::Display;

/// Number of leading zero hex characters a proof-of-work digest must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Difficulty(u32);

/// Hex characters in a 256-bit digest.
pub const MAX_DIFFICULTY: u32 = 64;

impl Difficulty {
    pub const fn new(leading_zeros: u32) -> Self {
        Difficulty(leading_zeros)
    }

    pub fn leading_zeros(&self) -> u32 {
        self.0
    }

    /// Checks a raw digest without hex encoding it first.
    ///
    /// Each byte contributes two hex characters, high nibble first, so an odd
    /// difficulty also inspects the high nibble of the next byte.
    pub fn is_met_by(&self, digest: &[u8; 32]) -> bool {
        if self.0 > MAX_DIFFICULTY {
            return false;
        }
        let full_bytes = (self.0 / 2) as usize;
        if digest[..full_bytes].iter().any(|&byte| byte != 0) {
            return false;
        }
        self.0 % 2 == 0 || digest[full_bytes] >> 4 == 0
    }
}

impl Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns true iff the first `difficulty` characters of `digest_hex` are `'0'`.
pub fn meets(digest_hex: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    digest_hex.len() >= difficulty
        && digest_hex.as_bytes()[..difficulty]
            .iter()
            .all(|&c| c == b'0')
}
