use std::time::Instant;

use anyhow::Result;
use gambit_nn::{
    Activation, ActivationKind, FullyConnected, InputDesc, NeuralNetwork, NodeInput, Output,
    SparseBinaryInput, TrainParams, Trainer, TrainingVector, WeightsStorage,
};

/// NNUE-shaped layout trained over a fork-join pool: a wide sparse-binary
/// first layer where only a handful of features are ever active.
fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    const NUM_FEATURES: u32 = 768;
    const HIDDEN: u32 = 256;

    let layer1 = WeightsStorage::new_shared(NUM_FEATURES, HIDDEN, 1);
    {
        let mut storage = layer1.write().unwrap();
        storage.is_sparse = true;
        storage.init(32, 0.0);
    }
    let layer2 = WeightsStorage::new_shared(HIDDEN, 1, 1);
    layer2.write().unwrap().init(HIDDEN, 0.0);

    let input = SparseBinaryInput::new(NUM_FEATURES, HIDDEN, layer1)?;
    let activation = Activation::new(&input, ActivationKind::CReLU);
    let hidden = FullyConnected::new(Some(&activation), HIDDEN, 1, layer2)?;
    let output = Activation::new(&hidden, ActivationKind::Sigmoid);
    let network = NeuralNetwork::init(vec![input, activation, hidden, output])?;

    // synthetic positions: ~16 active features, score tied to one of them
    let training_set: Vec<TrainingVector> = (0..4096usize)
        .map(|i| {
            let features: Vec<u16> = (0..16u16)
                .map(|k| ((i as u16).wrapping_mul(37).wrapping_add(k * 48)) % NUM_FEATURES as u16)
                .collect();
            let target = if features.contains(&7) { 1.0 } else { 0.0 };
            TrainingVector {
                input: InputDesc::single(NodeInput::SparseBinary(features)),
                output: Output::Single(target),
            }
        })
        .collect();

    let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build()?;
    let trainer = Trainer::init(&network, Some(&pool));
    let params = TrainParams {
        batch_size: 256,
        ..Default::default()
    };

    for epoch in 0..10usize {
        let start = Instant::now();
        let batches = trainer.train(&network, &training_set, &params, Some(&pool));
        let elapsed = start.elapsed();
        println!(
            "epoch {epoch}: {batches} batches, {} samples in {elapsed:?}",
            training_set.len()
        );
    }

    network.log_weight_stats();
    Ok(())
}
