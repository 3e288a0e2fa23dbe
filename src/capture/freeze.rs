/// Frames whose digest repeats this many times in a row confirm a freeze.
const FREEZE_THRESHOLD: u32 = 10;

/// At this count the source is suspect and the pump must stop perturbing
/// frames, or the perturbation itself would keep the digest moving.
const SUSPECT_THRESHOLD: u32 = 3;

/// Byte stride for the sparse digest. Prime and far larger than one pixel, so
/// a single-pixel liveness marker almost never lands on a sampled byte.
const SAMPLE_STRIDE: usize = 2053;

/// Detects a capture source that has stopped producing new content by
/// comparing cheap sparse digests of consecutive frames. Owns nothing but its
/// counters.
#[derive(Debug, Default)]
pub struct FreezeDetector {
    last_digest: Option<u64>,
    identical: u32,
}

impl FreezeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame's pixel buffer. Returns `true` exactly when the frozen
    /// streak reaches the threshold; the streak counter then restarts so the
    /// detector does not fire again on every subsequent frame.
    pub fn observe(&mut self, pixels: &[u8]) -> bool {
        let digest = sparse_digest(pixels);

        if self.last_digest == Some(digest) {
            self.identical += 1;
        } else {
            self.identical = 0;
        }
        self.last_digest = Some(digest);

        if self.identical >= FREEZE_THRESHOLD {
            self.identical = 0;
            return true;
        }
        false
    }

    /// The streak is long enough that the caller should stop forcing per-frame
    /// visual change, but not yet long enough to confirm a freeze.
    pub fn possibly_frozen(&self) -> bool {
        self.identical >= SUSPECT_THRESHOLD
    }

    /// Clear all state after a successful recovery.
    pub fn reset(&mut self) {
        self.last_digest = None;
        self.identical = 0;
    }
}

/// FNV-1a over a fixed sparse stride. Not a content hash; only has to notice
/// whether the frame moved.
fn sparse_digest(pixels: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut digest = FNV_OFFSET ^ pixels.len() as u64;
    let mut i = 0;
    while i < pixels.len() {
        digest ^= pixels[i] as u64;
        digest = digest.wrapping_mul(FNV_PRIME);
        i += SAMPLE_STRIDE;
    }
    digest
}
