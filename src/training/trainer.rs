//! Training loop implementation for CycleGAN
//!
//! Drives epochs x batches through [`TrainingStep`], steps the learning
//! rate schedule at every epoch boundary and triggers sampling and
//! checkpointing at their configured cadence.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tch::Device;
use tracing::{debug, info};

use super::losses::AdversarialLossSet;
use super::metrics::{EpochAccumulator, TrainingMetrics};
use super::replay_buffer::ReplayBuffers;
use super::schedule::{LinearDecay, LrScheduler};
use super::step::{BatchPosition, StepContext, TrainingStep};
use crate::data::{DataLoader, ImageFolderDataset, PairedDataset, Split};
use crate::error::{Error, Result};
use crate::model::{CycleGan, Optimizers};
use crate::utils::{resolve_device, CheckpointStore, HyperParameters, ImageGridSampler};

/// Receives the networks every `sample_interval` batches
pub trait Sampler {
    /// Render samples for the global batch counter `batches_done`
    fn sample(&mut self, model: &CycleGan, batches_done: usize) -> Result<()>;
}

/// Sampler that does nothing
#[derive(Debug, Default)]
pub struct NoSampler;

impl Sampler for NoSampler {
    fn sample(&mut self, _model: &CycleGan, _batches_done: usize) -> Result<()> {
        Ok(())
    }
}

/// Position of the run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainingState {
    /// Epoch currently being trained
    pub current_epoch: usize,
    /// Index of the next batch within the epoch
    pub current_batch_index: usize,
    /// Batches completed since the run started
    pub batches_done: usize,
    /// Wall time since the run started, including loading, sampling and checkpointing
    pub elapsed: Duration,
}

/// CycleGAN Trainer
pub struct Trainer {
    params: HyperParameters,
    model: CycleGan,
    optimizers: Optimizers,
    buffers: ReplayBuffers,
    losses: AdversarialLossSet,
    scheduler: LrScheduler,
    checkpoints: CheckpointStore,
    state: TrainingState,
    metrics: TrainingMetrics,
    show_progress: bool,
}

impl Trainer {
    /// Build networks, optimizers, buffers and schedule for one run
    ///
    /// When `start_epoch > 0` the weights saved for that epoch are restored.
    pub fn new(params: HyperParameters, device: Device) -> Result<Self> {
        if let Some(seed) = params.seed {
            tch::manual_seed(seed as i64);
        }
        let model = CycleGan::from_params(&params, device);
        Self::with_model(params, model)
    }

    /// Build a trainer around existing networks
    pub fn with_model(params: HyperParameters, mut model: CycleGan) -> Result<Self> {
        let schedule = LinearDecay::new(params.total_epochs, params.start_epoch, params.decay_epoch)?;
        let scheduler = LrScheduler::new(schedule, params.learning_rate);
        let optimizers = model.optimizers(scheduler.current_lr(), params.beta1, params.beta2)?;
        let buffers = ReplayBuffers::new(params.replay_capacity, params.seed)?;
        let losses = AdversarialLossSet::new(params.lambda_cycle, params.lambda_identity);
        let checkpoints = CheckpointStore::from_params(&params);

        if params.start_epoch > 0 {
            checkpoints.load(&mut model, params.start_epoch)?;
        }

        let state = TrainingState {
            current_epoch: params.start_epoch,
            ..Default::default()
        };

        Ok(Self {
            params,
            model,
            optimizers,
            buffers,
            losses,
            scheduler,
            checkpoints,
            state,
            metrics: TrainingMetrics::new(),
            show_progress: true,
        })
    }

    /// Enable or disable the per-epoch progress bar
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Train from `start_epoch` to `total_epochs`
    ///
    /// # Arguments
    ///
    /// * `loader` - DataLoader providing training batches
    /// * `sampler` - called when `batches_done % sample_interval == 0`
    ///
    /// # Returns
    ///
    /// Training metrics
    pub fn run<D: PairedDataset>(
        &mut self,
        loader: &mut DataLoader<D>,
        sampler: &mut dyn Sampler,
    ) -> Result<&TrainingMetrics> {
        let num_batches = loader.num_batches();
        if num_batches == 0 {
            return Err(Error::DataSourceExhausted(
                "training loader yields no batches".to_string(),
            ));
        }

        let start_epoch = self.params.start_epoch;
        let total_epochs = self.params.total_epochs;
        let total_batches = (total_epochs - start_epoch) * num_batches;
        let run_started = Instant::now();
        self.state.batches_done = 0;

        info!(
            "Starting run {} for epochs {}..{}, {} batches per epoch",
            self.params.run_id(),
            start_epoch,
            total_epochs,
            num_batches
        );

        for epoch in start_epoch..total_epochs {
            self.state.current_epoch = epoch;
            self.state.current_batch_index = 0;
            let mut accumulator = EpochAccumulator::new();

            let pb = self.progress_bar(num_batches);
            loader.reset();

            while let Some(batch) = loader.next_batch() {
                let batch = batch?;
                let batch_index = self.state.current_batch_index;
                let position = BatchPosition {
                    epoch,
                    batch: batch_index,
                };

                let mut ctx = StepContext {
                    model: &self.model,
                    optimizers: &mut self.optimizers,
                    buffers: &mut self.buffers,
                    losses: &self.losses,
                };
                let outcome = TrainingStep::new(&batch, position).run(&mut ctx)?;

                let l = outcome.losses;
                accumulator.push(&l);
                self.state.elapsed = run_started.elapsed();
                self.state.batches_done += 1;
                self.state.current_batch_index += 1;

                let batches_left = total_batches.saturating_sub(self.state.batches_done);
                let eta = self
                    .state
                    .elapsed
                    .div_f64(self.state.batches_done as f64)
                    .mul_f64(batches_left as f64);
                debug!(
                    "[Epoch {}/{}] [Batch {}/{}] [D loss: {:.4}] [G loss: {:.4}, adv: {:.4}, cycle: {:.4}, identity: {:.4}] ETA: {:?}",
                    epoch,
                    total_epochs,
                    batch_index,
                    num_batches,
                    l.discriminator_mean(),
                    l.generator_total,
                    l.adversarial,
                    l.cycle,
                    l.identity,
                    eta
                );
                pb.set_message(format!("D: {:.4}, G: {:.4}", l.discriminator_mean(), l.generator_total));
                pb.inc(1);

                let batches_done = epoch * num_batches + batch_index;
                if batches_done % self.params.sample_interval == 0 {
                    sampler.sample(&self.model, batches_done)?;
                }
            }

            pb.finish_and_clear();

            let lr = self.scheduler.step(&mut self.optimizers);
            let record = accumulator.finish(epoch, lr);
            self.metrics.record_epoch(record);

            info!(
                "Epoch {}/{}: G_loss={:.4}, D_loss={:.4}, cycle={:.4}, identity={:.4}, lr={:.2e}, elapsed={:?}",
                epoch + 1,
                total_epochs,
                record.generator_total,
                record.discriminator_mean(),
                record.cycle,
                record.identity,
                lr,
                self.state.elapsed
            );

            if let Some(every) = self.params.checkpoint_every() {
                if (epoch + 1) % every == 0 {
                    self.checkpoints
                        .save(&self.model, epoch + 1, self.scheduler.current_factor(), Some(&record))?;
                }
            }
            self.state.elapsed = run_started.elapsed();
        }

        std::fs::create_dir_all(self.checkpoints.dir())?;
        self.metrics.save_csv(self.checkpoints.metrics_path())?;

        Ok(&self.metrics)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        pb.set_style(style);
        pb
    }

    /// Get training metrics
    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    /// Current run position
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Learning rate currently applied to all optimizers
    pub fn current_lr(&self) -> f64 {
        self.scheduler.current_lr()
    }

    /// Networks being trained
    pub fn model(&self) -> &CycleGan {
        &self.model
    }

    /// Run hyperparameters
    pub fn params(&self) -> &HyperParameters {
        &self.params
    }
}

/// Run one complete training from image folders on disk
///
/// Resolves the device, builds the train loader and the held-out test
/// loader that feeds the sample grids, then trains.
pub fn train_from_params(params: HyperParameters) -> Result<TrainingMetrics> {
    let device = resolve_device(&params.device)?;
    info!("Using device {:?} for run {}", device, params.run_id());

    let train_set = ImageFolderDataset::from_params(&params, Split::Train)?;
    let test_set = ImageFolderDataset::from_params(&params, Split::Test)?;

    let mut loader = DataLoader::new(train_set, params.batch_size, true, false, params.seed)?.with_device(device);
    let test_loader = DataLoader::new(
        test_set,
        params.test_batch_size,
        true,
        false,
        params.seed.map(|s| s.wrapping_add(2)),
    )?;
    let mut sampler = ImageGridSampler::from_params(&params, test_loader);

    let mut trainer = Trainer::new(params, device)?;
    let metrics = trainer.run(&mut loader, &mut sampler)?;
    Ok(metrics.clone())
}
