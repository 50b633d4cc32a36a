use rand_core::{impls, RngCore, SeedableRng};

pub const SEED_W: u32 = 0x6deb_3a92;
pub const SEED_Z: u32 = 0x189f_7245;

/// Marsaglia multiply-with-carry generator. Fast and not cryptographic;
/// every worker seeds it with the same constants so runs are reproducible.
#[derive(Debug, Clone)]
pub struct Mwc {
    w: u32,
    z: u32,
}

impl Mwc {
    pub fn new(w: u32, z: u32) -> Self {
        // A zero half locks the generator at zero forever.
        Self {
            w: if w == 0 { SEED_W } else { w },
            z: if z == 0 { SEED_Z } else { z },
        }
    }
}

impl Default for Mwc {
    fn default() -> Self {
        Self::new(SEED_W, SEED_Z)
    }
}

impl RngCore for Mwc {
    fn next_u32(&mut self) -> u32 {
        self.z = 36969u32
            .wrapping_mul(self.z & 0xFFFF)
            .wrapping_add(self.z >> 16);
        self.w = 18000u32
            .wrapping_mul(self.w & 0xFFFF)
            .wrapping_add(self.w >> 16);
        (self.z << 16).wrapping_add(self.w)
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        impls::fill_bytes_via_next(self, dst)
    }
}

impl SeedableRng for Mwc {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        let w = u32::from_le_bytes([seed[0], seed[1], seed[2], seed[3]]);
        let z = u32::from_le_bytes([seed[4], seed[5], seed[6], seed[7]]);
        Self::new(w, z)
    }
}

/// Perturb a phase length by +10%, -10% or nothing, chosen uniformly.
pub fn jitter<R: RngCore>(rng: &mut R, secs: f64) -> f64 {
    match rng.next_u32() % 3 {
        0 => secs / 10.0,
        1 => -secs / 10.0,
        _ => 0.0,
    }
}
