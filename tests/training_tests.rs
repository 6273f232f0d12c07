use gambit_nn::{
    Activation, ActivationKind, FullyConnected, InputDesc, NeuralNetwork, NodeInput, Optimizer,
    Output, RunContext, SparseBinaryInput, TrainParams, Trainer, TrainingVector, WeightsStorage,
    WeightsStoragePtr,
};

fn toy_network() -> (NeuralNetwork, WeightsStoragePtr, WeightsStoragePtr) {
    let layer1 = WeightsStorage::new_shared(2, 64, 1);
    {
        let mut storage = layer1.write().unwrap();
        storage.is_sparse = true;
        storage.init(64, 0.0);
    }
    let layer2 = WeightsStorage::new_shared(64, 1, 1);
    layer2.write().unwrap().init(64, 0.0);

    let input = SparseBinaryInput::new(2, 64, layer1.clone()).unwrap();
    let activation = Activation::new(&input, ActivationKind::CReLU);
    let hidden = FullyConnected::new(Some(&activation), 64, 1, layer2.clone()).unwrap();
    let output = Activation::new(&hidden, ActivationKind::Sigmoid);

    let network = NeuralNetwork::init(vec![input, activation, hidden, output]).unwrap();
    (network, layer1, layer2)
}

fn toy_training_set() -> Vec<TrainingVector> {
    [
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
    .collect()
}

fn max_prediction_error(
    network: &NeuralNetwork,
    ctx: &mut RunContext,
    training_set: &[TrainingVector],
) -> f32 {
    training_set
        .iter()
        .map(|vector| {
            let outputs = network.run(&vector.input, ctx);
            let Output::Single(target) = &vector.output else {
                unreachable!("toy set has single outputs");
            };
            (outputs[0] - target).abs()
        })
        .fold(0.0f32, f32::max)
}

#[test]
fn toy_set_converges_with_adadelta() {
    let (network, _, _) = toy_network();
    let training_set = toy_training_set();
    let trainer = Trainer::init(&network, None);
    let mut ctx = RunContext::init(&network);

    let params = TrainParams {
        batch_size: 10,
        ..Default::default()
    };

    let mut converged = false;
    for iteration in 0..30000usize {
        trainer.train(&network, &training_set, &params, None);
        if iteration % 500 == 499
            && max_prediction_error(&network, &mut ctx, &training_set) < 0.05
        {
            converged = true;
            break;
        }
    }
    assert!(converged, "predictions did not reach the 0.05 band");
}

#[test]
fn bias_only_network_learns_the_target_rate() {
    let storage = WeightsStorage::new_shared(1, 1, 1);
    {
        let mut guard = storage.write().unwrap();
        guard.is_sparse = true;
        guard.init(1, 0.0);
    }
    let input = SparseBinaryInput::new(1, 1, storage.clone()).unwrap();
    let output = Activation::new(&input, ActivationKind::Sigmoid);
    let network = NeuralNetwork::init(vec![input, output]).unwrap();

    let training_set = vec![TrainingVector {
        input: InputDesc::single(NodeInput::SparseBinary(vec![])),
        output: Output::Single(0.25),
    }];
    let trainer = Trainer::init(&network, None);

    for iteration in 0..5000usize {
        let params = TrainParams {
            iteration,
            optimizer: Optimizer::Adam,
            learning_rate: 0.002,
            weight_decay: 0.0,
            ..Default::default()
        };
        trainer.train(&network, &training_set, &params, None);
    }

    // sigma(bias) = 0.25  =>  bias = ln(1/3)
    let bias = storage.read().unwrap().variants[0].weights[1];
    assert!(
        (bias - (-1.0986123)).abs() < 0.01,
        "bias settled at {bias}"
    );

    let mut ctx = RunContext::init(&network);
    let outputs = network.run(
        &InputDesc::single(NodeInput::SparseBinary(vec![])),
        &mut ctx,
    );
    assert!((outputs[0] - 0.25).abs() < 0.01);
}

fn copy_storage(source: &WeightsStoragePtr, target: &WeightsStoragePtr) {
    let source = source.read().unwrap();
    let mut target = target.write().unwrap();
    target.is_sparse = source.is_sparse;
    target.weights_mask.copy_from_slice(&source.weights_mask);
    for (dst, src) in target.variants.iter_mut().zip(&source.variants) {
        dst.weights.copy_from_slice(&src.weights);
        dst.gradient_moment1.copy_from_slice(&src.gradient_moment1);
        dst.gradient_moment2.copy_from_slice(&src.gradient_moment2);
    }
}

fn striped_training_set(len: usize) -> Vec<TrainingVector> {
    (0..len)
        .map(|i| {
            let (features, target) = match i % 4 {
                0 => (vec![], 0.0f32),
                1 => (vec![0u16], 1.0),
                2 => (vec![1], 0.0),
                _ => (vec![0, 1], 0.0),
            };
            TrainingVector {
                input: InputDesc::single(NodeInput::SparseBinary(features)),
                output: Output::Single(target),
            }
        })
        .collect()
}

#[test]
fn threaded_training_matches_serial() {
    let (serial_network, serial_layer1, serial_layer2) = toy_network();
    let (threaded_network, threaded_layer1, threaded_layer2) = toy_network();
    copy_storage(&serial_layer1, &threaded_layer1);
    copy_storage(&serial_layer2, &threaded_layer2);

    let training_set = striped_training_set(64);
    let params = TrainParams {
        batch_size: 64,
        ..Default::default()
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .unwrap();

    let serial_trainer = Trainer::init(&serial_network, None);
    let threaded_trainer = Trainer::init(&threaded_network, Some(&pool));

    for _ in 0..5 {
        let batches = serial_trainer.train(&serial_network, &training_set, &params, None);
        assert_eq!(batches, 1);
        let batches =
            threaded_trainer.train(&threaded_network, &training_set, &params, Some(&pool));
        assert_eq!(batches, 1);
    }

    for (serial, threaded) in [
        (&serial_layer1, &threaded_layer1),
        (&serial_layer2, &threaded_layer2),
    ] {
        let serial = serial.read().unwrap();
        let threaded = threaded.read().unwrap();
        for (a, b) in serial.variants[0]
            .weights
            .iter()
            .zip(threaded.variants[0].weights.iter())
        {
            assert!(
                (a - b).abs() < 1.0e-3,
                "serial {a} vs threaded {b} diverged"
            );
        }
    }
}

#[test]
fn multithreaded_batches_cover_the_training_set() {
    let (network, layer1, layer2) = toy_network();
    let training_set = striped_training_set(256);
    let params = TrainParams {
        batch_size: 128,
        ..Default::default()
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .unwrap();
    let trainer = Trainer::init(&network, Some(&pool));

    for _ in 0..3 {
        let batches = trainer.train(&network, &training_set, &params, Some(&pool));
        assert_eq!(batches, 2);
    }

    for storage in [&layer1, &layer2] {
        let storage = storage.read().unwrap();
        for variant in &storage.variants {
            assert!(variant.weights.iter().all(|w| w.is_finite()));
            assert!(variant
                .weights
                .iter()
                .all(|w| w.abs() <= storage.weights_range));
        }
    }

    // small batches fall back to the calling thread even with a pool
    let small_params = TrainParams {
        batch_size: 16,
        ..Default::default()
    };
    let batches = trainer.train(&network, &training_set, &small_params, Some(&pool));
    assert_eq!(batches, 16);
}
