use anyhow::Result;
use gambit_nn::{
    Activation, ActivationKind, FullyConnected, InputDesc, NeuralNetwork, NodeInput, Output,
    RunContext, SparseBinaryInput, TrainParams, Trainer, TrainingVector, WeightsStorage,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("Sparse-binary toy training (engine API)");

    // 1. Network: 2 sparse inputs -> 64 CReLU -> 1 -> Sigmoid
    let layer1 = WeightsStorage::new_shared(2, 64, 1);
    {
        let mut storage = layer1.write().unwrap();
        storage.is_sparse = true;
        storage.init(64, 0.0);
    }
    let layer2 = WeightsStorage::new_shared(64, 1, 1);
    layer2.write().unwrap().init(64, 0.0);

    let input = SparseBinaryInput::new(2, 64, layer1)?;
    let activation = Activation::new(&input, ActivationKind::CReLU);
    let hidden = FullyConnected::new(Some(&activation), 64, 1, layer2)?;
    let output = Activation::new(&hidden, ActivationKind::Sigmoid);
    let network = NeuralNetwork::init(vec![input, activation, hidden, output])?;

    // 2. Data: only feature 0 alone should light up the output
    let training_set: Vec<TrainingVector> = [
        (vec![], 0.0f32),
        (vec![0u16], 1.0),
        (vec![1], 0.0),
        (vec![0, 1], 0.0),
    ]
    .into_iter()
    .map(|(features, target)| TrainingVector {
        input: InputDesc::single(NodeInput::SparseBinary(features)),
        output: Output::Single(target),
    })
    .collect();

    // 3. Training
    let trainer = Trainer::init(&network, None);
    let mut ctx = RunContext::init(&network);
    let params = TrainParams {
        batch_size: 10,
        ..Default::default()
    };

    for epoch in 0..10001usize {
        trainer.train(&network, &training_set, &params, None);

        if epoch % 1000 == 0 {
            let mut error_sum = 0.0f32;
            for vector in &training_set {
                let outputs = network.run(&vector.input, &mut ctx);
                let Output::Single(target) = &vector.output else {
                    unreachable!();
                };
                error_sum += (outputs[0] - target) * (outputs[0] - target);
            }
            let rmse = (error_sum / training_set.len() as f32).sqrt();
            println!("Epoch {epoch}: RMSE = {rmse:.6}");
        }
    }

    // 4. Predictions
    for vector in &training_set {
        let outputs = network.run(&vector.input, &mut ctx);
        let NodeInput::SparseBinary(features) = &vector.input.inputs[0] else {
            unreachable!();
        };
        println!("features {features:?} -> {:.4}", outputs[0]);
    }
    network.log_weight_stats();

    Ok(())
}
