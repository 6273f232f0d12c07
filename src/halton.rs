use rand::Rng;

/// Multidimensional Halton sequence generator.
///
/// One prime base per dimension starting from 2, with a uniformly drawn
/// digit-scramble permutation and a randomized start offset per dimension.
/// Used to spread initial weights more evenly than independent uniform
/// samples would.
pub struct HaltonSequence {
    dims: usize,
    bases: Vec<u64>,
    /// Radical-inverse digit slots, one row per dimension.
    digits: Vec<Vec<u64>>,
    /// rnd[d][j] caches the partial radical inverse from digit j upward.
    /// One extra slot so the highest digit can read its (zero) neighbor.
    rnd: Vec<Vec<f64>>,
    powers: Vec<Vec<u64>>,
    perms: Vec<Vec<u64>>,
}

impl HaltonSequence {
    /// Number of radical-inverse digit slots per dimension.
    pub const WIDTH: usize = 64;

    /// 129th prime, never used as a base.
    const LEAP: usize = 727;

    pub fn new(dims: usize) -> Self {
        let bases = first_primes(dims);
        let mut rng = rand::thread_rng();

        let mut powers = vec![vec![0u64; Self::WIDTH]; dims];
        for (row, &base) in powers.iter_mut().zip(&bases) {
            row[0] = base;
            for j in 1..Self::WIDTH {
                row[j] = row[j - 1].wrapping_mul(base);
            }
        }

        let perms = bases
            .iter()
            .map(|&base| scrambled_permutation(&mut rng, base))
            .collect();
        let starts: Vec<u64> = bases
            .iter()
            .map(|&base| random_start(&mut rng, base))
            .collect();

        let mut sequence = Self {
            dims,
            bases,
            digits: vec![vec![0u64; Self::WIDTH]; dims],
            rnd: vec![vec![0.0; Self::WIDTH + 1]; dims],
            powers,
            perms,
        };
        sequence.expand_starts(&starts);
        sequence
    }

    pub fn num_dimensions(&self) -> usize {
        self.dims
    }

    /// Current sample value in the given dimension, in [0, 1).
    pub fn get_double(&self, dimension: usize) -> f64 {
        self.rnd[dimension][0]
    }

    /// Advances every dimension by one sample.
    pub fn next_sample(&mut self) {
        for d in 0..self.dims {
            let base = self.bases[d];

            let mut j = 0;
            while self.digits[d][j] + 1 >= base {
                j += 1;
            }
            self.digits[d][j] += 1;
            let digit = self.perms[d][self.digits[d][j] as usize];
            self.rnd[d][j] = self.rnd[d][j + 1] + digit as f64 / self.powers[d][j] as f64;

            // carry reset of the lower digits
            for j in (0..j).rev() {
                self.digits[d][j] = 0;
                let digit = self.perms[d][0];
                self.rnd[d][j] = self.rnd[d][j + 1] + digit as f64 / self.powers[d][j] as f64;
            }
        }
    }

    /// Advances by a prime leap to decorrelate consumers sharing a sequence.
    pub fn next_sample_leap(&mut self) {
        for _ in 0..Self::LEAP {
            self.next_sample();
        }
    }

    /// Seeds the digit expansion of each dimension from its start offset.
    fn expand_starts(&mut self, starts: &[u64]) {
        for d in 0..self.dims {
            let base = self.bases[d];
            let mut n = starts[d].saturating_sub(1);
            let mut j = 0usize;
            while n > 0 && j < Self::WIDTH {
                self.digits[d][j] = n % base;
                n /= base;
                j += 1;
            }
            for j in (0..j).rev() {
                let digit = self.perms[d][self.digits[d][j] as usize];
                self.rnd[d][j] = self.rnd[d][j + 1] + digit as f64 / self.powers[d][j] as f64;
            }
        }
    }
}

/// First `count` primes, starting from 2.
fn first_primes(count: usize) -> Vec<u64> {
    let mut primes = Vec::with_capacity(count);
    let mut candidate = 1u64;
    while primes.len() < count {
        candidate += 1;
        let mut is_prime = true;
        let mut i = 2u64;
        while i * i <= candidate {
            if candidate % i == 0 {
                is_prime = false;
                break;
            }
            i += 1;
        }
        if is_prime {
            primes.push(candidate);
        }
    }
    primes
}

/// Identity permutation of 0..base with randomized swaps. Digit zero stays
/// fixed so leading zeros of the radical inverse remain zero.
fn scrambled_permutation(rng: &mut impl Rng, base: u64) -> Vec<u64> {
    let mut perm: Vec<u64> = (0..base).collect();
    for j in 1..base as usize {
        let seed: f64 = rng.gen();
        let other = (seed * base as f64).floor() as usize;
        if other != 0 {
            perm.swap(j, other);
        }
    }
    perm
}

/// Converts a uniform draw into a start index whose radical inverse lands
/// near the drawn value.
fn random_start(rng: &mut impl Rng, base: u64) -> u64 {
    let mut r: f64 = rng.gen();
    let mut z = 0u64;
    let mut b = base;
    while r > 1.0e-16 {
        if r >= 1.0 / b as f64 {
            let cnt = (r * b as f64).floor() as u64;
            r -= cnt as f64 / b as f64;
            z += cnt * (b / base);
        }
        match b.checked_mul(base) {
            Some(next) => b = next,
            None => break,
        }
    }
    z
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bases_are_distinct_primes() {
        let sequence = HaltonSequence::new(8);
        assert_eq!(sequence.bases, vec![2, 3, 5, 7, 11, 13, 17, 19]);
    }

    #[test]
    fn samples_stay_in_unit_interval() {
        let mut sequence = HaltonSequence::new(4);
        for _ in 0..2000 {
            for d in 0..4 {
                let u = sequence.get_double(d);
                assert!((0.0..1.0).contains(&u), "sample {u} out of range");
            }
            sequence.next_sample();
        }
    }

    #[test]
    fn per_dimension_mean_is_centered() {
        let dims = 16;
        let mut sequence = HaltonSequence::new(dims);
        let mut sums = vec![0.0f64; dims];
        for _ in 0..1024 {
            for (d, sum) in sums.iter_mut().enumerate() {
                *sum += sequence.get_double(d);
            }
            sequence.next_sample();
        }
        for sum in sums {
            let mean = sum / 1024.0;
            assert!((mean - 0.5).abs() < 0.02, "mean {mean} too far from 0.5");
        }
    }

    #[test]
    fn leap_advances_the_sequence() {
        let mut sequence = HaltonSequence::new(2);
        let before = sequence.get_double(0);
        sequence.next_sample_leap();
        let after = sequence.get_double(0);
        assert_ne!(before.to_bits(), after.to_bits());
    }
}
