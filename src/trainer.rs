use std::sync::{Arc, Mutex};

use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::gradient::Gradients;
use crate::network::{NeuralNetwork, RunContext, TrainingVector};
use crate::storage::{WeightsStoragePtr, WeightsUpdateOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Optimizer {
    Adadelta,
    Adam,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrainParams {
    pub iteration: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub optimizer: Optimizer,
    pub clamp_weights: bool,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            iteration: 0,
            batch_size: 32,
            learning_rate: 0.5,
            weight_decay: 1.0e-5,
            optimizer: Optimizer::Adadelta,
            clamp_weights: true,
        }
    }
}

/// Batches at or below this size are not worth fanning out.
const SERIAL_BATCH_LIMIT: usize = 32;

struct PerThreadData {
    run_context: RunContext,
    /// One gradient buffer per distinct weight storage, in trainer order.
    gradients: Vec<Gradients>,
}

/// Mini-batch trainer.
///
/// Owns one full set of gradient buffers and one run context per worker.
/// Per batch: every worker clears its buffers, the batch items are
/// backpropagated data-parallel into per-worker buffers, then a single task
/// reduces the workers into worker 0 and runs the optimizer on every storage.
pub struct Trainer {
    storages: Vec<WeightsStoragePtr>,
    /// Node position -> index into `storages` (and each worker's `gradients`).
    node_storage: Vec<Option<usize>>,
    per_thread: Vec<Mutex<PerThreadData>>,
}

impl Trainer {
    /// Collects the distinct weight storages of the network and sizes the
    /// per-worker state from the injected pool (one worker when no pool).
    /// Two nodes sharing a storage share a gradient buffer on each worker.
    pub fn init(network: &NeuralNetwork, pool: Option<&ThreadPool>) -> Self {
        let num_threads = pool.map_or(1, ThreadPool::current_num_threads);

        let mut storages: Vec<WeightsStoragePtr> = Vec::new();
        let mut node_storage = vec![None; network.nodes().len()];
        for (i, node) in network.nodes().iter().enumerate() {
            let Some(storage) = node.storage() else {
                continue;
            };
            let index = storages
                .iter()
                .position(|candidate| Arc::ptr_eq(candidate, storage))
                .unwrap_or_else(|| {
                    storages.push(storage.clone());
                    storages.len() - 1
                });
            node_storage[i] = Some(index);
        }

        let per_thread = (0..num_threads)
            .map(|_| {
                let gradients = storages
                    .iter()
                    .map(|storage| {
                        let storage = storage.read().unwrap();
                        Gradients::new(
                            storage.input_size(),
                            storage.output_size(),
                            storage.num_variants() as u32,
                            storage.is_sparse,
                        )
                    })
                    .collect();
                Mutex::new(PerThreadData {
                    run_context: RunContext::init(network),
                    gradients,
                })
            })
            .collect();

        debug!(
            storages = storages.len(),
            workers = num_threads,
            "trainer initialized"
        );

        Self {
            storages,
            node_storage,
            per_thread,
        }
    }

    /// Runs one pass over the training set in mini-batches and returns the
    /// number of batches processed. With a pool and a large enough batch the
    /// three phases run fork-join; otherwise everything stays on the calling
    /// thread.
    pub fn train(
        &self,
        network: &NeuralNetwork,
        training_set: &[TrainingVector],
        params: &TrainParams,
        pool: Option<&ThreadPool>,
    ) -> usize {
        debug_assert!(params.batch_size > 0);
        let num_batches = (training_set.len() + params.batch_size - 1) / params.batch_size;

        for batch_index in 0..num_batches {
            trace!(batch = batch_index, "training batch");

            match pool {
                Some(pool) if params.batch_size > SERIAL_BATCH_LIMIT => {
                    debug_assert!(pool.current_num_threads() <= self.per_thread.len());

                    // phase 1: every worker clears its own gradient buffers
                    pool.broadcast(|ctx| {
                        let mut data = self.per_thread[ctx.index()].lock().unwrap();
                        for gradients in &mut data.gradients {
                            gradients.clear();
                        }
                    });

                    // phase 2: worker t backpropagates batch items t, t+N, ...
                    // into its own buffers; the broadcast return is the fence
                    pool.broadcast(|ctx| {
                        let mut data = self.per_thread[ctx.index()].lock().unwrap();
                        let data = &mut *data;
                        let mut index_in_batch = ctx.index();
                        loop {
                            let vec_index = batch_index * params.batch_size + index_in_batch;
                            if index_in_batch >= params.batch_size
                                || vec_index >= training_set.len()
                            {
                                break;
                            }
                            network.run_and_backpropagate(
                                &training_set[vec_index],
                                &mut data.run_context,
                                &mut data.gradients,
                                &self.node_storage,
                            );
                            index_in_batch += ctx.num_threads();
                        }
                    });

                    // phase 3: single task
                    self.reduce_and_update(batch_index, params);
                }
                _ => {
                    {
                        let mut data = self.per_thread[0].lock().unwrap();
                        let data = &mut *data;
                        for gradients in &mut data.gradients {
                            gradients.clear();
                        }
                        for index_in_batch in 0..params.batch_size {
                            let vec_index = batch_index * params.batch_size + index_in_batch;
                            if vec_index >= training_set.len() {
                                break;
                            }
                            network.run_and_backpropagate(
                                &training_set[vec_index],
                                &mut data.run_context,
                                &mut data.gradients,
                                &self.node_storage,
                            );
                        }
                    }
                    self.reduce_and_update(batch_index, params);
                }
            }
        }

        num_batches
    }

    /// Reduces worker 1..N gradients into worker 0 and applies the optimizer
    /// to every storage. Runs on a single thread, which makes the
    /// dirty-flag merge safe.
    fn reduce_and_update(&self, batch_index: usize, params: &TrainParams) {
        let options = WeightsUpdateOptions {
            iteration: params.iteration + batch_index,
            weight_decay: params.weight_decay,
            learning_rate: params.learning_rate,
            gradient_scale: 1.0,
            clamp_weights: params.clamp_weights,
        };

        let (first, rest) = self
            .per_thread
            .split_first()
            .expect("trainer always has a worker");
        let mut target_data = first.lock().unwrap();

        for (storage_index, storage) in self.storages.iter().enumerate() {
            for source in rest {
                let mut source_data = source.lock().unwrap();
                let target = &mut target_data.gradients[storage_index];
                let source = &mut source_data.gradients[storage_index];

                // row adds first, flag merge second
                for row in 0..=target.num_inputs() {
                    target.accumulate(source, row);
                }
                for row in 0..=target.num_inputs() {
                    target.accumulate_update_dirty(source, row);
                }
            }

            let gradients = &target_data.gradients[storage_index];
            let mut storage = storage.write().unwrap();
            match params.optimizer {
                Optimizer::Adadelta => storage.update_adadelta(gradients, &options),
                Optimizer::Adam => storage.update_adam(gradients, &options),
            }
        }
    }
}
