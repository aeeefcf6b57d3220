//! Loss functions for CycleGAN training
//!
//! Least-squares adversarial loss plus L1 cycle-consistency and identity
//! terms. Networks are taken as `ModuleT` trait objects so any
//! differentiable image-to-image / image-to-score function can be plugged
//! in.

use tch::{nn::ModuleT, Reduction, Tensor};

use crate::model::CycleGan;

/// Mean squared error against a target
pub fn mse(input: &Tensor, target: &Tensor) -> Tensor {
    input.mse_loss(target, Reduction::Mean)
}

/// Mean absolute error against a target
pub fn l1(input: &Tensor, target: &Tensor) -> Tensor {
    input.l1_loss(target, Reduction::Mean)
}

/// Adversarial loss: discriminator scores pushed towards "valid" (ones)
pub fn adversarial_loss(scores: &Tensor) -> Tensor {
    mse(scores, &Tensor::ones_like(scores))
}

/// Discriminator loss: `0.5 * (mse(real, 1) + mse(fake, 0))`
///
/// `fake_scores` must come from a detached fake batch so no gradient
/// reaches the generators.
pub fn discriminator_loss(real_scores: &Tensor, fake_scores: &Tensor) -> Tensor {
    let real_loss = mse(real_scores, &Tensor::ones_like(real_scores));
    let fake_loss = mse(fake_scores, &Tensor::zeros_like(fake_scores));
    (real_loss + fake_loss) * 0.5
}

/// Borrowed view of the four networks used for one loss evaluation
#[derive(Clone, Copy)]
pub struct Networks<'a> {
    pub g_ab: &'a dyn ModuleT,
    pub g_ba: &'a dyn ModuleT,
    pub d_a: &'a dyn ModuleT,
    pub d_b: &'a dyn ModuleT,
}

impl<'a> From<&'a CycleGan> for Networks<'a> {
    fn from(model: &'a CycleGan) -> Self {
        Self {
            g_ab: &model.g_ab,
            g_ba: &model.g_ba,
            d_a: &model.d_a,
            d_b: &model.d_b,
        }
    }
}

/// Generator-side losses of one batch, with the fakes they were computed from
pub struct GeneratorLosses {
    /// Mean of both identity terms
    pub identity: Tensor,
    /// Mean of both adversarial terms
    pub adversarial: Tensor,
    /// Mean of both cycle terms
    pub cycle: Tensor,
    /// `adversarial + lambda_cycle * cycle + lambda_identity * identity`
    pub total: Tensor,
    /// G_BA(real_b), still attached to the graph
    pub fake_a: Tensor,
    /// G_AB(real_a), still attached to the graph
    pub fake_b: Tensor,
}

/// Weighted set of CycleGAN losses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdversarialLossSet {
    /// Cycle-consistency weight
    pub lambda_cycle: f64,
    /// Identity weight
    pub lambda_identity: f64,
}

impl Default for AdversarialLossSet {
    fn default() -> Self {
        Self {
            lambda_cycle: 10.0,
            lambda_identity: 5.0,
        }
    }
}

impl AdversarialLossSet {
    pub fn new(lambda_cycle: f64, lambda_identity: f64) -> Self {
        Self {
            lambda_cycle,
            lambda_identity,
        }
    }

    /// Identity loss: each generator fed an image already in its target domain
    pub fn identity_loss(&self, nets: Networks<'_>, real_a: &Tensor, real_b: &Tensor, train: bool) -> Tensor {
        let id_a = l1(&nets.g_ba.forward_t(real_a, train), real_a);
        let id_b = l1(&nets.g_ab.forward_t(real_b, train), real_b);
        (id_a + id_b) / 2.0
    }

    /// Adversarial loss of both translations against the current discriminators
    pub fn gan_loss(&self, nets: Networks<'_>, fake_a: &Tensor, fake_b: &Tensor, train: bool) -> Tensor {
        let gan_ab = adversarial_loss(&nets.d_b.forward_t(fake_b, train));
        let gan_ba = adversarial_loss(&nets.d_a.forward_t(fake_a, train));
        (gan_ab + gan_ba) / 2.0
    }

    /// Cycle loss: A -> B -> A and B -> A -> B reconstructions
    pub fn cycle_loss(
        &self,
        nets: Networks<'_>,
        real_a: &Tensor,
        real_b: &Tensor,
        fake_a: &Tensor,
        fake_b: &Tensor,
        train: bool,
    ) -> Tensor {
        let cycle_a = l1(&nets.g_ba.forward_t(fake_b, train), real_a);
        let cycle_b = l1(&nets.g_ab.forward_t(fake_a, train), real_b);
        (cycle_a + cycle_b) / 2.0
    }

    /// Weighted generator objective
    pub fn generator_total(&self, adversarial: &Tensor, cycle: &Tensor, identity: &Tensor) -> Tensor {
        adversarial + cycle * self.lambda_cycle + identity * self.lambda_identity
    }

    /// All generator-side losses for one batch
    pub fn generator_losses(&self, nets: Networks<'_>, real_a: &Tensor, real_b: &Tensor, train: bool) -> GeneratorLosses {
        let identity = self.identity_loss(nets, real_a, real_b, train);

        let fake_b = nets.g_ab.forward_t(real_a, train);
        let fake_a = nets.g_ba.forward_t(real_b, train);
        let adversarial = self.gan_loss(nets, &fake_a, &fake_b, train);
        let cycle = self.cycle_loss(nets, real_a, real_b, &fake_a, &fake_b, train);

        let total = self.generator_total(&adversarial, &cycle, &identity);

        GeneratorLosses {
            identity,
            adversarial,
            cycle,
            total,
            fake_a,
            fake_b,
        }
    }

    /// Loss of one discriminator on a real batch and a replayed fake batch
    pub fn discriminator_loss(&self, disc: &dyn ModuleT, real: &Tensor, fake: &Tensor, train: bool) -> Tensor {
        let real_scores = disc.forward_t(real, train);
        let fake_scores = disc.forward_t(&fake.detach(), train);
        discriminator_loss(&real_scores, &fake_scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[derive(Debug)]
    struct Identity;

    impl ModuleT for Identity {
        fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
            xs.shallow_clone()
        }
    }

    /// Always answers "valid" with a 1x2x2 patch map
    #[derive(Debug)]
    struct AlwaysValid;

    impl ModuleT for AlwaysValid {
        fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
            Tensor::ones([xs.size()[0], 1, 2, 2], (Kind::Float, xs.device()))
        }
    }

    fn nets<'a>(g: &'a Identity, d: &'a AlwaysValid) -> Networks<'a> {
        Networks {
            g_ab: g,
            g_ba: g,
            d_a: d,
            d_b: d,
        }
    }

    fn images() -> (Tensor, Tensor) {
        let opts = (Kind::Float, Device::Cpu);
        (Tensor::rand([2, 3, 8, 8], opts), Tensor::rand([2, 3, 8, 8], opts))
    }

    #[test]
    fn test_identity_generators_have_zero_identity_and_cycle_loss() {
        let (g, d) = (Identity, AlwaysValid);
        let (real_a, real_b) = images();

        let losses = AdversarialLossSet::default().generator_losses(nets(&g, &d), &real_a, &real_b, true);

        assert!(losses.identity.double_value(&[]).abs() < 1e-7);
        assert!(losses.cycle.double_value(&[]).abs() < 1e-7);
    }

    #[test]
    fn test_fooled_discriminator_gives_zero_adversarial_loss() {
        let (g, d) = (Identity, AlwaysValid);
        let (real_a, real_b) = images();

        let losses = AdversarialLossSet::default().generator_losses(nets(&g, &d), &real_a, &real_b, true);

        assert_eq!(losses.adversarial.double_value(&[]), 0.0);
        assert_eq!(losses.total.double_value(&[]), 0.0);
        assert_eq!(losses.fake_b.size(), real_a.size());
    }

    #[test]
    fn test_total_applies_weights() {
        let set = AdversarialLossSet::new(10.0, 5.0);
        let total = set.generator_total(
            &Tensor::from(1.0f32),
            &Tensor::from(0.5f32),
            &Tensor::from(0.2f32),
        );
        assert!((total.double_value(&[]) - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_discriminator_loss_halves_sum() {
        let opts = (Kind::Float, Device::Cpu);
        let real = Tensor::zeros([4, 1, 2, 2], opts); // error 1 against ones
        let fake = Tensor::ones([4, 1, 2, 2], opts); // error 1 against zeros
        assert!((discriminator_loss(&real, &fake).double_value(&[]) - 1.0).abs() < 1e-6);

        let perfect = discriminator_loss(&Tensor::ones([4, 1, 2, 2], opts), &Tensor::zeros([4, 1, 2, 2], opts));
        assert_eq!(perfect.double_value(&[]), 0.0);
    }

    #[test]
    fn test_discriminator_loss_does_not_reach_fake_source() {
        let opts = (Kind::Float, Device::Cpu);
        let source = Tensor::rand([2, 3, 8, 8], opts).set_requires_grad(true);
        let fake = &source * 2.0;
        let real = Tensor::rand([2, 3, 8, 8], opts);

        #[derive(Debug)]
        struct Mean;
        impl ModuleT for Mean {
            fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
                xs.mean(Kind::Float)
            }
        }

        let w = Tensor::ones([1], opts).set_requires_grad(true);
        let loss = AdversarialLossSet::default().discriminator_loss(&Mean, &(&real * &w), &fake, true);
        loss.backward();

        assert!(!source.grad().defined());
        assert!(w.grad().defined());
    }
}
