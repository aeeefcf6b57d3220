//! One optimisation step over a batch
//!
//! A step moves through three updates in a fixed order:
//! `GeneratorUpdate -> DiscriminatorAUpdate -> DiscriminatorBUpdate -> Done`.
//! The discriminator updates consume the fakes produced by the generator
//! update (routed through the replay buffers); they are never recomputed.

use tch::{nn::VarStore, Kind, Tensor};
use tracing::error;

use super::losses::{AdversarialLossSet, Networks};
use super::replay_buffer::ReplayBuffers;
use crate::data::Batch;
use crate::error::{Error, Result};
use crate::model::{CycleGan, Optimizers};

/// Where in the run a batch sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPosition {
    pub epoch: usize,
    pub batch: usize,
}

/// Named phases of a training step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    GeneratorUpdate,
    DiscriminatorAUpdate,
    DiscriminatorBUpdate,
    Done,
}

/// Scalar losses of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossComponents {
    pub identity: f64,
    pub adversarial: f64,
    pub cycle: f64,
    pub generator_total: f64,
    pub discriminator_a: f64,
    pub discriminator_b: f64,
}

impl LossComponents {
    /// Mean of both discriminator losses
    pub fn discriminator_mean(&self) -> f64 {
        (self.discriminator_a + self.discriminator_b) / 2.0
    }
}

/// Fakes of both domains, detached from the generator graph
pub struct GeneratedFakes {
    /// G_BA(real_b)
    pub fake_a: Tensor,
    /// G_AB(real_a)
    pub fake_b: Tensor,
}

/// Everything a step needs besides the batch itself
pub struct StepContext<'a> {
    pub model: &'a CycleGan,
    pub optimizers: &'a mut Optimizers,
    pub buffers: &'a mut ReplayBuffers,
    pub losses: &'a AdversarialLossSet,
}

/// Result of a completed step
pub struct StepOutcome {
    pub losses: LossComponents,
    /// Fakes produced in the generator update
    pub generated: GeneratedFakes,
    /// Batches the discriminators were trained on, as returned by the buffers
    pub replayed: GeneratedFakes,
}

enum State {
    GeneratorUpdate,
    DiscriminatorA {
        generated: GeneratedFakes,
    },
    DiscriminatorB {
        generated: GeneratedFakes,
        replayed_a: Tensor,
    },
    Done {
        generated: GeneratedFakes,
        replayed: GeneratedFakes,
    },
}

/// State machine for a single batch
pub struct TrainingStep<'b> {
    batch: &'b Batch,
    position: BatchPosition,
    state: State,
    losses: LossComponents,
}

impl<'b> TrainingStep<'b> {
    /// Start a step at `GeneratorUpdate`
    pub fn new(batch: &'b Batch, position: BatchPosition) -> Self {
        Self {
            batch,
            position,
            state: State::GeneratorUpdate,
            losses: LossComponents::default(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> StepPhase {
        match self.state {
            State::GeneratorUpdate => StepPhase::GeneratorUpdate,
            State::DiscriminatorA { .. } => StepPhase::DiscriminatorAUpdate,
            State::DiscriminatorB { .. } => StepPhase::DiscriminatorBUpdate,
            State::Done { .. } => StepPhase::Done,
        }
    }

    /// Losses recorded so far
    pub fn losses(&self) -> &LossComponents {
        &self.losses
    }

    /// Execute the current phase and move to the next one
    ///
    /// Advancing a finished step is a no-op. Any error leaves the step
    /// consumed; there is no partial success.
    pub fn advance(self, ctx: &mut StepContext<'_>) -> Result<Self> {
        let TrainingStep {
            batch,
            position,
            state,
            mut losses,
        } = self;

        let state = match state {
            State::GeneratorUpdate => {
                let generated = update_generators(ctx, batch, position, &mut losses)?;
                State::DiscriminatorA { generated }
            }
            State::DiscriminatorA { generated } => {
                let replayed_a = ctx.buffers.fake_a.push_and_pop(&generated.fake_a);
                losses.discriminator_a = update_discriminator(
                    ctx.losses,
                    (&ctx.model.d_a, &ctx.model.d_a_vs),
                    &mut ctx.optimizers.d_a,
                    &batch.a,
                    &replayed_a,
                    ("discriminator_a", "discriminator_a_gradient", position),
                )?;
                State::DiscriminatorB {
                    generated,
                    replayed_a,
                }
            }
            State::DiscriminatorB {
                generated,
                replayed_a,
            } => {
                let replayed_b = ctx.buffers.fake_b.push_and_pop(&generated.fake_b);
                losses.discriminator_b = update_discriminator(
                    ctx.losses,
                    (&ctx.model.d_b, &ctx.model.d_b_vs),
                    &mut ctx.optimizers.d_b,
                    &batch.b,
                    &replayed_b,
                    ("discriminator_b", "discriminator_b_gradient", position),
                )?;
                State::Done {
                    generated,
                    replayed: GeneratedFakes {
                        fake_a: replayed_a,
                        fake_b: replayed_b,
                    },
                }
            }
            done @ State::Done { .. } => done,
        };

        Ok(TrainingStep {
            batch,
            position,
            state,
            losses,
        })
    }

    /// Run every remaining phase
    pub fn run(mut self, ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
        loop {
            self = self.advance(ctx)?;
            if let State::Done { generated, replayed } = self.state {
                return Ok(StepOutcome {
                    losses: self.losses,
                    generated,
                    replayed,
                });
            }
        }
    }
}

fn update_generators(
    ctx: &mut StepContext<'_>,
    batch: &Batch,
    position: BatchPosition,
    losses: &mut LossComponents,
) -> Result<GeneratedFakes> {
    ctx.optimizers.generator.zero_grad();

    let g = ctx
        .losses
        .generator_losses(Networks::from(ctx.model), &batch.a, &batch.b, true);
    losses.generator_total = finite(&g.total, "generator", position)?;
    losses.identity = g.identity.double_value(&[]);
    losses.adversarial = g.adversarial.double_value(&[]);
    losses.cycle = g.cycle.double_value(&[]);

    g.total.backward();
    finite_gradients(&ctx.model.gen_vs, "generator_gradient", position)?;
    ctx.optimizers.generator.step();

    Ok(GeneratedFakes {
        fake_a: g.fake_a.detach(),
        fake_b: g.fake_b.detach(),
    })
}

fn update_discriminator(
    losses: &AdversarialLossSet,
    (disc, vs): (&dyn tch::nn::ModuleT, &VarStore),
    optimizer: &mut tch::nn::Optimizer,
    real: &Tensor,
    replayed: &Tensor,
    (term, gradient_term, position): (&'static str, &'static str, BatchPosition),
) -> Result<f64> {
    optimizer.zero_grad();
    let loss = losses.discriminator_loss(disc, real, replayed, true);
    let value = finite(&loss, term, position)?;
    loss.backward();
    finite_gradients(vs, gradient_term, position)?;
    optimizer.step();
    Ok(value)
}

fn finite(loss: &Tensor, term: &'static str, position: BatchPosition) -> Result<f64> {
    let value = loss.double_value(&[]);
    if value.is_finite() {
        return Ok(value);
    }
    Err(numerical_failure(term, value, position))
}

/// Fail before the optimizer step when any gradient of `vs` is NaN or infinite
///
/// The reported value is the summed absolute gradient, which is non-finite
/// exactly when some entry is.
fn finite_gradients(vs: &VarStore, term: &'static str, position: BatchPosition) -> Result<()> {
    let mut total = 0.0;
    for var in vs.trainable_variables() {
        let grad = var.grad();
        if grad.defined() {
            total += grad.abs().sum(Kind::Double).double_value(&[]);
        }
    }
    if total.is_finite() {
        return Ok(());
    }
    Err(numerical_failure(term, total, position))
}

fn numerical_failure(term: &'static str, value: f64, position: BatchPosition) -> Error {
    error!(
        "Non-finite {} {} at epoch {}, batch {}",
        term, value, position.epoch, position.batch
    );
    Error::NumericalFailure {
        term,
        value,
        epoch: position.epoch,
        batch: position.batch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiscriminatorConfig, GeneratorConfig};
    use crate::training::{LinearDecay, LrScheduler};
    use tch::{nn, nn::ModuleT, nn::OptimizerConfig, Device};

    fn tiny_model() -> CycleGan {
        tch::manual_seed(0);
        CycleGan::new(
            GeneratorConfig {
                channels: 3,
                residual_blocks: 1,
                base_filters: 8,
            },
            DiscriminatorConfig {
                channels: 3,
                img_height: 16,
                img_width: 16,
                base_filters: 8,
            },
            Device::Cpu,
        )
    }

    fn batch(n: i64) -> Batch {
        let opts = (Kind::Float, Device::Cpu);
        Batch {
            a: Tensor::rand([n, 3, 16, 16], opts) * 2.0 - 1.0,
            b: Tensor::rand([n, 3, 16, 16], opts) * 2.0 - 1.0,
        }
    }

    const POS: BatchPosition = BatchPosition { epoch: 0, batch: 0 };

    #[test]
    fn test_phases_run_in_order() {
        let model = tiny_model();
        let mut optimizers = model.optimizers(2e-4, 0.5, 0.999).unwrap();
        let mut buffers = ReplayBuffers::new(50, Some(1)).unwrap();
        let losses = AdversarialLossSet::default();
        let mut ctx = StepContext {
            model: &model,
            optimizers: &mut optimizers,
            buffers: &mut buffers,
            losses: &losses,
        };

        let batch = batch(2);
        let mut step = TrainingStep::new(&batch, POS);
        let mut phases = vec![step.phase()];
        for _ in 0..4 {
            step = step.advance(&mut ctx).unwrap();
            phases.push(step.phase());
        }

        assert_eq!(
            phases,
            vec![
                StepPhase::GeneratorUpdate,
                StepPhase::DiscriminatorAUpdate,
                StepPhase::DiscriminatorBUpdate,
                StepPhase::Done,
                StepPhase::Done,
            ]
        );
        assert!(step.losses().discriminator_b > 0.0);
    }

    #[test]
    fn test_discriminators_see_generator_phase_fakes() {
        let model = tiny_model();
        let mut optimizers = model.optimizers(1e-2, 0.5, 0.999).unwrap();
        let mut buffers = ReplayBuffers::new(50, Some(1)).unwrap();
        let losses = AdversarialLossSet::default();
        let mut ctx = StepContext {
            model: &model,
            optimizers: &mut optimizers,
            buffers: &mut buffers,
            losses: &losses,
        };

        let batch = batch(2);
        let outcome = TrainingStep::new(&batch, POS).run(&mut ctx).unwrap();

        // buffers were empty, so they hand back exactly what they were given
        assert!(outcome.replayed.fake_a.equal(&outcome.generated.fake_a));
        assert!(outcome.replayed.fake_b.equal(&outcome.generated.fake_b));

        // the generators moved, so a recomputed fake would differ
        let recomputed = tch::no_grad(|| model.g_ba.forward_t(&batch.b, true));
        assert!(!recomputed.allclose(&outcome.generated.fake_a, 1e-7, 1e-7, false));

        assert_eq!(buffers.fake_a.len(), 2);
        assert_eq!(buffers.fake_b.len(), 2);
    }

    #[test]
    fn test_losses_are_finite_and_consistent() {
        let model = tiny_model();
        let mut optimizers = model.optimizers(2e-4, 0.5, 0.999).unwrap();
        let mut buffers = ReplayBuffers::new(50, Some(1)).unwrap();
        let losses = AdversarialLossSet::new(10.0, 5.0);
        let mut ctx = StepContext {
            model: &model,
            optimizers: &mut optimizers,
            buffers: &mut buffers,
            losses: &losses,
        };

        let batch = batch(1);
        let l = TrainingStep::new(&batch, POS).run(&mut ctx).unwrap().losses;

        let expected = l.adversarial + 10.0 * l.cycle + 5.0 * l.identity;
        assert!((l.generator_total - expected).abs() < 1e-4);
        assert!(l.discriminator_mean().is_finite());
    }

    #[test]
    fn test_nan_input_is_fatal() {
        let model = tiny_model();
        let mut optimizers = model.optimizers(2e-4, 0.5, 0.999).unwrap();
        let mut buffers = ReplayBuffers::new(50, Some(1)).unwrap();
        let losses = AdversarialLossSet::default();
        let mut ctx = StepContext {
            model: &model,
            optimizers: &mut optimizers,
            buffers: &mut buffers,
            losses: &losses,
        };

        let opts = (Kind::Float, Device::Cpu);
        let batch = Batch {
            a: Tensor::full([1, 3, 16, 16], f64::NAN, opts),
            b: Tensor::zeros([1, 3, 16, 16], opts),
        };
        let position = BatchPosition { epoch: 4, batch: 7 };

        match TrainingStep::new(&batch, position).run(&mut ctx) {
            Err(Error::NumericalFailure { term, epoch, batch, .. }) => {
                assert_eq!(term, "generator");
                assert_eq!((epoch, batch), (4, 7));
            }
            _ => panic!("expected a numerical failure"),
        }
        // nothing reached the discriminator phase
        assert!(buffers.fake_a.is_empty());
    }

    fn snapshot(vs: &VarStore) -> Vec<Tensor> {
        vs.trainable_variables().iter().map(|t| t.copy()).collect()
    }

    fn unchanged(vs: &VarStore, before: &[Tensor]) -> bool {
        vs.trainable_variables().iter().zip(before).all(|(now, then)| now.equal(then))
    }

    /// Runs one step after the schedule has been stepped once, and reports
    /// for the generator pair and both discriminators whether weights stayed put
    fn step_after_schedule(schedule: LinearDecay) -> [bool; 3] {
        let model = tiny_model();
        let mut optimizers = model.optimizers(2e-4, 0.5, 0.999).unwrap();
        let mut scheduler = LrScheduler::new(schedule, 2e-4);
        scheduler.step(&mut optimizers);

        let before = [snapshot(&model.gen_vs), snapshot(&model.d_a_vs), snapshot(&model.d_b_vs)];
        let mut buffers = ReplayBuffers::new(50, Some(1)).unwrap();
        let losses = AdversarialLossSet::default();
        let mut ctx = StepContext {
            model: &model,
            optimizers: &mut optimizers,
            buffers: &mut buffers,
            losses: &losses,
        };
        let batch = batch(2);
        TrainingStep::new(&batch, POS).run(&mut ctx).unwrap();

        [
            unchanged(&model.gen_vs, &before[0]),
            unchanged(&model.d_a_vs, &before[1]),
            unchanged(&model.d_b_vs, &before[2]),
        ]
    }

    #[test]
    fn test_zero_rate_freezes_all_three_optimizers() {
        // one epoch in total, decaying from the start: factor 0 after one step
        let frozen = step_after_schedule(LinearDecay::new(1, 0, 0).unwrap());
        assert_eq!(frozen, [true, true, true]);
    }

    #[test]
    fn test_non_zero_rate_moves_all_three_optimizers() {
        let frozen = step_after_schedule(LinearDecay::new(4, 0, 2).unwrap());
        assert_eq!(frozen, [false, false, false]);
    }

    /// Scores sqrt(w) for every image; at w = 0 the value is finite but
    /// its derivative is not
    #[derive(Debug)]
    struct SqrtScore {
        w: Tensor,
    }

    impl ModuleT for SqrtScore {
        fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
            xs.mean_dim(Some([1i64, 2, 3].as_slice()), false, Kind::Float) * 0.0 + self.w.sqrt()
        }
    }

    #[test]
    fn test_non_finite_gradient_is_fatal_before_update() {
        let vs = VarStore::new(Device::Cpu);
        let disc = SqrtScore {
            w: vs.root().zeros("w", &[1]),
        };
        let mut optimizer = nn::Adam::default().build(&vs, 1e-2).unwrap();
        let losses = AdversarialLossSet::default();

        let opts = (Kind::Float, Device::Cpu);
        let real = Tensor::rand([2, 3, 16, 16], opts);
        let fake = Tensor::rand([2, 3, 16, 16], opts);
        let position = BatchPosition { epoch: 2, batch: 5 };

        // the loss itself is finite
        let loss = losses.discriminator_loss(&disc, &real, &fake, true);
        assert!(loss.double_value(&[]).is_finite());

        let result = update_discriminator(
            &losses,
            (&disc, &vs),
            &mut optimizer,
            &real,
            &fake,
            ("discriminator_a", "discriminator_a_gradient", position),
        );

        match result {
            Err(Error::NumericalFailure { term, value, epoch, batch }) => {
                assert_eq!(term, "discriminator_a_gradient");
                assert!(!value.is_finite());
                assert_eq!((epoch, batch), (2, 5));
            }
            _ => panic!("expected a numerical failure"),
        }
        // the optimizer never stepped
        assert_eq!(disc.w.double_value(&[0]), 0.0);
    }

    #[test]
    fn test_finite_gradients_pass() {
        let model = tiny_model();
        let real = Tensor::rand([1, 3, 16, 16], (Kind::Float, Device::Cpu));
        model.d_a.forward_t(&real, true).mean(Kind::Float).backward();

        assert!(finite_gradients(&model.d_a_vs, "discriminator_a_gradient", POS).is_ok());
    }
}
