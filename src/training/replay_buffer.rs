//! History buffer of generated samples
//!
//! Discriminators are trained on a mix of the newest fakes and fakes from
//! earlier iterations, which damps oscillation between the two players.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::Tensor;

use crate::error::{Error, Result};

/// Default number of samples kept per domain
pub const DEFAULT_CAPACITY: usize = 50;

/// Fixed-capacity store of previously generated samples
///
/// Items are single-image tensors with a leading batch dimension of 1.
/// Until the buffer is full every item is stored and passed through.
/// Afterwards each item is, with probability 0.5, swapped with a
/// uniformly chosen stored item (the stored one is returned), and
/// otherwise passed through without touching storage.
pub struct ReplayBuffer {
    storage: Vec<Tensor>,
    capacity: usize,
    rng: StdRng,
}

impl ReplayBuffer {
    /// Create an empty buffer with an entropy-seeded RNG
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// Create an empty buffer with a fixed seed
    pub fn with_seed(capacity: usize, seed: u64) -> Result<Self> {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    /// Create an empty buffer drawing from `rng`
    ///
    /// A zero capacity is a configuration error.
    pub fn with_rng(capacity: usize, rng: StdRng) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("replay buffer capacity must be > 0"));
        }
        Ok(Self {
            storage: Vec::with_capacity(capacity),
            capacity,
            rng,
        })
    }

    /// Push one item and get back the item the discriminator should see
    pub fn push_and_pop_item(&mut self, item: Tensor) -> Tensor {
        if self.storage.len() < self.capacity {
            self.storage.push(item.detach());
            return item;
        }

        if self.rng.gen::<f64>() > 0.5 {
            let idx = self.rng.gen_range(0..self.capacity);
            std::mem::replace(&mut self.storage[idx], item.detach())
        } else {
            item
        }
    }

    /// Push a batch and get back a batch of the same shape
    ///
    /// Each item along dimension 0 is handled independently and the
    /// output preserves item order.
    pub fn push_and_pop(&mut self, batch: &Tensor) -> Tensor {
        let n = batch.size()[0];
        let items: Vec<Tensor> = (0..n)
            .map(|i| self.push_and_pop_item(batch.narrow(0, i, 1)))
            .collect();
        Tensor::cat(&items, 0)
    }

    /// Number of stored samples
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether nothing has been stored yet
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Whether the buffer has reached capacity
    pub fn is_full(&self) -> bool {
        self.storage.len() == self.capacity
    }

    /// Maximum number of stored samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One replay buffer per generated domain
pub struct ReplayBuffers {
    /// Fakes produced by G_BA (domain A)
    pub fake_a: ReplayBuffer,
    /// Fakes produced by G_AB (domain B)
    pub fake_b: ReplayBuffer,
}

impl ReplayBuffers {
    /// Create both buffers; a seed makes their draws reproducible
    pub fn new(capacity: usize, seed: Option<u64>) -> Result<Self> {
        Ok(match seed {
            Some(s) => Self {
                fake_a: ReplayBuffer::with_seed(capacity, s)?,
                fake_b: ReplayBuffer::with_seed(capacity, s.wrapping_add(1))?,
            },
            None => Self {
                fake_a: ReplayBuffer::new(capacity)?,
                fake_b: ReplayBuffer::new(capacity)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn item(v: f64) -> Tensor {
        Tensor::full([1, 1], v, (Kind::Float, Device::Cpu))
    }

    fn value(t: &Tensor) -> f64 {
        t.double_value(&[0, 0])
    }

    #[test]
    fn test_fills_then_passes_through() {
        let mut buffer = ReplayBuffer::with_seed(5, 0).unwrap();

        for i in 0..5 {
            let out = buffer.push_and_pop_item(item(i as f64));
            assert_eq!(value(&out), i as f64);
            assert_eq!(buffer.len(), i + 1);
        }
        assert!(buffer.is_full());
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut buffer = ReplayBuffer::with_seed(4, 1).unwrap();
        for i in 0..100 {
            buffer.push_and_pop_item(item(i as f64));
            assert!(buffer.len() <= 4);
        }
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_batch_order_preserved_while_filling() {
        let mut buffer = ReplayBuffer::with_seed(10, 2).unwrap();
        let batch = Tensor::arange(6i64, (Kind::Float, Device::Cpu)).view([6, 1]);

        let out = buffer.push_and_pop(&batch);

        assert_eq!(out.size(), vec![6, 1]);
        assert!(out.equal(&batch));
        assert_eq!(buffer.len(), 6);
    }

    #[test]
    fn test_full_buffer_returns_history_or_new() {
        let mut buffer = ReplayBuffer::with_seed(3, 3).unwrap();
        for i in 0..3 {
            buffer.push_and_pop_item(item(i as f64));
        }

        for i in 100..200 {
            let out = value(&buffer.push_and_pop_item(item(i as f64)));
            // either the new item or something pushed before it
            assert!(out == i as f64 || out < i as f64);
        }
    }

    #[test]
    fn test_pass_through_probability_is_half() {
        let mut buffer = ReplayBuffer::with_seed(DEFAULT_CAPACITY, 42).unwrap();
        for i in 0..DEFAULT_CAPACITY {
            buffer.push_and_pop_item(item(i as f64));
        }

        let trials = 4000;
        let mut unchanged = 0;
        for i in 0..trials {
            let v = (DEFAULT_CAPACITY + i) as f64;
            if value(&buffer.push_and_pop_item(item(v))) == v {
                unchanged += 1;
            }
        }

        let ratio = unchanged as f64 / trials as f64;
        assert!((ratio - 0.5).abs() < 0.05, "pass-through ratio {}", ratio);
    }

    #[test]
    fn test_full_buffer_batch_keeps_shape_and_order() {
        let mut buffer = ReplayBuffer::with_seed(3, 5).unwrap();
        let history = Tensor::arange(3i64, (Kind::Float, Device::Cpu)).view([3, 1]);
        buffer.push_and_pop(&history);
        assert!(buffer.is_full());

        let batch = Tensor::arange_start(100i64, 140, (Kind::Float, Device::Cpu)).view([40, 1]);
        let out = buffer.push_and_pop(&batch);

        assert_eq!(out.size(), vec![40, 1]);
        let mut passed = 0;
        for i in 0..40 {
            let v = out.double_value(&[i, 0]);
            let new = 100.0 + i as f64;
            if v == new {
                passed += 1;
            } else {
                // a stored item: old history or an earlier item of this batch
                assert!(v < 3.0 || (100.0..new).contains(&v), "unexpected {} at {}", v, i);
            }
        }
        assert!(passed > 0 && passed < 40);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(ReplayBuffer::with_seed(0, 1), Err(Error::Configuration(_))));
        assert!(ReplayBuffers::new(0, None).is_err());
    }

    #[test]
    fn test_same_seed_same_draws() {
        let run = |seed| {
            let mut buffer = ReplayBuffer::with_seed(2, seed).unwrap();
            (0..50)
                .map(|i| value(&buffer.push_and_pop_item(item(i as f64))))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(9), run(9));
    }
}
