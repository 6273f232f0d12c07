use gambit_nn::{
    FullyConnected, Gradients, Inputs, Node, SparseBinaryInput, WeightsStorage,
};

#[test]
fn clear_zeroes_dense_buffers() {
    let mut gradients = Gradients::new(4, 3, 1, false);
    for value in gradients.variants[0].values.iter_mut() {
        *value = 1.5;
    }
    gradients.variants[0].dirty[2] = true;

    gradients.clear();

    assert!(gradients.variants[0].values.iter().all(|&v| v == 0.0));
    assert!(gradients.variants[0].dirty.iter().all(|&d| !d));
}

#[test]
fn clear_zeroes_sparse_buffers_row_by_row() {
    let mut gradients = Gradients::new(8, 4, 1, true);
    for row in [1usize, 3, 8] {
        for value in gradients.variants[0].values[row * 4..(row + 1) * 4].iter_mut() {
            *value = 2.25;
        }
        gradients.variants[0].dirty[row] = true;
    }

    gradients.clear();

    assert!(gradients.variants[0].values.iter().all(|&v| v == 0.0));
    assert!(gradients.variants[0].dirty.iter().all(|&d| !d));
}

#[test]
fn pairwise_reduction_sums_disjoint_workers() {
    let num_inputs = 8u32;
    let num_outputs = 4usize;

    // four workers, each dirtying its own pair of rows
    let mut buffers: Vec<Gradients> = (0..4)
        .map(|worker| {
            let mut gradients = Gradients::new(num_inputs, num_outputs as u32, 1, true);
            for row in [2 * worker, 2 * worker + 1] {
                for value in gradients.variants[0].values[row * num_outputs..(row + 1) * num_outputs]
                    .iter_mut()
                {
                    *value = (worker + 1) as f32;
                }
                gradients.variants[0].dirty[row] = true;
            }
            gradients
        })
        .collect();

    let (target, sources) = buffers.split_at_mut(1);
    let target = &mut target[0];
    for source in sources.iter_mut() {
        for row in 0..=num_inputs {
            target.accumulate(source, row);
        }
        for row in 0..=num_inputs {
            target.accumulate_update_dirty(source, row);
        }
    }

    for row in 0..num_inputs as usize {
        let expected = (row / 2 + 1) as f32;
        for &value in &target.variants[0].values[row * num_outputs..(row + 1) * num_outputs] {
            assert_eq!(value, expected);
        }
        assert!(target.variants[0].dirty[row]);
    }
    // bias row was never touched
    assert!(!target.variants[0].dirty[num_inputs as usize]);

    for source in sources {
        assert!(source.variants[0].values.iter().all(|&v| v == 0.0));
        assert!(source.variants[0].dirty.iter().all(|&d| !d));
    }
}

#[test]
fn accumulate_skips_clean_sparse_rows() {
    let mut target = Gradients::new(4, 2, 1, true);
    let mut source = Gradients::new(4, 2, 1, true);
    target.variants[0].values[0] = 1.0;
    target.variants[0].dirty[0] = true;

    target.accumulate(&mut source, 0);
    target.accumulate_update_dirty(&mut source, 0);

    assert_eq!(target.variants[0].values[0], 1.0);
    assert!(target.variants[0].dirty[0]);
}

#[test]
fn sparse_binary_gradients_match_dense_equivalent() {
    let sparse_storage = WeightsStorage::new_shared(4, 64, 1);
    {
        let mut storage = sparse_storage.write().unwrap();
        storage.is_sparse = true;
        storage.init(4, 0.0);
    }
    let dense_storage = WeightsStorage::new_shared(4, 64, 1);
    dense_storage.write().unwrap().init(4, 0.0);

    let sparse_node = SparseBinaryInput::new(4, 64, sparse_storage).unwrap();
    let dense_node = FullyConnected::new(None, 4, 64, dense_storage).unwrap();

    let error: Vec<f32> = (0..64).map(|i| i as f32 * 0.1 - 3.15).collect();
    let active: Vec<u16> = vec![1, 3];
    let dense_input: Vec<f32> = vec![0.0, 1.0, 0.0, 1.0];

    let mut sparse_gradients = Gradients::new(4, 64, 1, true);
    let mut dense_gradients = Gradients::new(4, 64, 1, false);
    let mut sparse_scratch = sparse_node.create_scratch();
    let mut dense_scratch = dense_node.create_scratch();

    sparse_node.backpropagate(
        &error,
        Inputs::SparseBinary(&active),
        &mut sparse_scratch,
        Some(&mut sparse_gradients),
        0,
    );
    dense_node.backpropagate(
        &error,
        Inputs::Dense(&dense_input),
        &mut dense_scratch,
        Some(&mut dense_gradients),
        0,
    );

    assert_eq!(
        &sparse_gradients.variants[0].values[..],
        &dense_gradients.variants[0].values[..]
    );

    // dirty exactly on the active rows plus the bias row
    let dirty = &sparse_gradients.variants[0].dirty;
    assert_eq!(
        dirty.iter().copied().collect::<Vec<_>>(),
        vec![false, true, false, true, true]
    );
}

#[test]
fn empty_active_set_touches_only_the_bias_row() {
    let storage = WeightsStorage::new_shared(4, 64, 1);
    {
        let mut storage = storage.write().unwrap();
        storage.is_sparse = true;
        storage.init(4, 0.0);
    }
    let node = SparseBinaryInput::new(4, 64, storage).unwrap();

    let error = vec![0.5f32; 64];
    let mut gradients = Gradients::new(4, 64, 1, true);
    let mut scratch = node.create_scratch();
    node.backpropagate(
        &error,
        Inputs::SparseBinary(&[]),
        &mut scratch,
        Some(&mut gradients),
        0,
    );

    let variant = &gradients.variants[0];
    assert!(variant.values[..4 * 64].iter().all(|&v| v == 0.0));
    assert!(variant.values[4 * 64..].iter().all(|&v| v == 0.5));
    assert_eq!(
        variant.dirty.iter().copied().collect::<Vec<_>>(),
        vec![false, false, false, false, true]
    );
}

#[test]
fn two_workers_on_the_same_sample_double_the_gradient() {
    let storage = WeightsStorage::new_shared(2, 64, 1);
    {
        let mut storage = storage.write().unwrap();
        storage.is_sparse = true;
        storage.init(64, 0.0);
    }
    let node = SparseBinaryInput::new(2, 64, storage).unwrap();

    let error: Vec<f32> = (0..64).map(|i| (i as f32 - 31.0) * 0.01).collect();
    let active: Vec<u16> = vec![0];

    let mut worker0 = Gradients::new(2, 64, 1, true);
    let mut worker1 = Gradients::new(2, 64, 1, true);
    let mut reference = Gradients::new(2, 64, 1, true);
    let mut scratch = node.create_scratch();

    for gradients in [&mut worker0, &mut worker1, &mut reference] {
        node.backpropagate(
            &error,
            Inputs::SparseBinary(&active),
            &mut scratch,
            Some(gradients),
            0,
        );
    }

    for row in 0..=2 {
        worker0.accumulate(&mut worker1, row);
    }
    for row in 0..=2 {
        worker0.accumulate_update_dirty(&mut worker1, row);
    }

    for (&reduced, &single) in worker0.variants[0]
        .values
        .iter()
        .zip(reference.variants[0].values.iter())
    {
        assert_eq!(reduced, 2.0 * single);
    }
    assert!(worker1.variants[0].values.iter().all(|&v| v == 0.0));
    assert!(worker1.variants[0].dirty.iter().all(|&d| !d));
}
