/// Adler-32 style weak checksum over a sliding window.
///
/// Two 16-bit sums packed into 32 bits; sliding the window by one byte is O(1).
const MOD_ADLER: u32 = 65521;

#[derive(Debug, Clone, Copy)]
pub struct WeakHash {
    a: u32,
    b: u32,
    len: u32,
}

impl WeakHash {
    pub fn of(window: &[u8]) -> Self {
        // Accumulate in u64 and reduce once at the end.
        let (a, b) = window.iter().fold((1u64, 0u64), |(a, b), &byte| {
            let a = a + u64::from(byte);
            (a, b + a)
        });
        Self {
            a: (a % u64::from(MOD_ADLER)) as u32,
            b: (b % u64::from(MOD_ADLER)) as u32,
            len: window.len() as u32,
        }
    }

    /// Drop `leaving` from the front of the window and append `entering`.
    pub fn roll(&mut self, leaving: u8, entering: u8) {
        let out = u32::from(leaving);
        let inp = u32::from(entering);
        self.a = (self.a + MOD_ADLER - out + inp) % MOD_ADLER;
        self.b = (self.b + MOD_ADLER - 1 + self.a - (out * self.len) % MOD_ADLER) % MOD_ADLER;
    }

    pub fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }
}
