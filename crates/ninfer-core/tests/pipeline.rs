//! End-to-end runs through the ONNX backend.
#![cfg(feature = "onnx")]

mod common;

use std::fs::File;

use approx::assert_abs_diff_eq;
use ndarray::ArrayD;
use ndarray_npy::NpzReader;
use ninfer_core::{
    Compression, InferenceError, InferenceService, ModelFormat, NinferConfig, NinferError,
    ServiceState,
};
use pretty_assertions::assert_eq;

use common::{
    add_model, archive_entries, identity_model, ramp, read_archive_f32, two_output_model,
    write_file, write_npy_file, write_npz_file,
};

const IMAGE: [usize; 4] = [1, 3, 224, 224];

fn image_dims() -> Vec<Option<usize>> {
    IMAGE.iter().map(|d| Some(*d)).collect()
}

#[test]
fn test_detector_outputs_are_archived() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(
        dir.path(),
        "detector.onnx",
        &identity_model("input", "boxes", &image_dims()),
    );
    let dataset = write_npy_file(dir.path(), "dataset.npy", &ramp(&IMAGE));

    let mut service = InferenceService::new(&model, &dataset, 1).unwrap();
    assert_eq!(service.state(), ServiceState::DataLoaded);
    assert_eq!(service.model().format(), ModelFormat::Onnx);

    let declared = service.model().output_specs()[0].clone();
    assert_eq!(declared.name, "boxes");

    let archive = service.run().unwrap().to_path_buf();
    assert_eq!(service.state(), ServiceState::Persisted);
    assert_eq!(archive.file_name().unwrap(), "archive.zip");
    assert!(archive.starts_with(service.result_dir()));
    assert!(service.result_dir().join("boxes.npy").is_file());

    assert_eq!(archive_entries(&archive), vec!["boxes.npy"]);
    let boxes = read_archive_f32(&archive, "boxes");
    let shape: Vec<Option<usize>> = boxes.shape().iter().map(|d| Some(*d)).collect();
    assert_eq!(shape, declared.shape);
}

#[test]
fn test_outputs_round_trip_through_identity() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(
        dir.path(),
        "identity.onnx",
        &identity_model("x", "y", &[Some(2), Some(5)]),
    );
    let input = ramp(&[2, 5]);
    let dataset = write_npz_file(dir.path(), "inputs.npz", &[("x", input.clone())]);

    let mut service = InferenceService::new(&model, &dataset, 1).unwrap();
    let archive = service.run().unwrap().to_path_buf();

    let output = read_archive_f32(&archive, "y");
    assert_eq!(output.shape(), input.shape());
    for (got, want) in output.iter().zip(input.iter()) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
    }
}

#[test]
fn test_multi_input_model_binds_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(dir.path(), "add.onnx", &add_model(&[Some(3)]));
    let a = ArrayD::from_shape_vec(vec![3], vec![1.0f32, 2.0, 3.0]).unwrap();
    let b = ArrayD::from_shape_vec(vec![3], vec![0.5f32, -2.0, 10.0]).unwrap();
    let dataset = write_npz_file(dir.path(), "inputs.npz", &[("b", b), ("a", a)]);

    let mut service = InferenceService::new(&model, &dataset, 2).unwrap();
    let names: Vec<_> = service.model().input_specs().iter().map(|s| s.name.clone()).collect();
    assert_eq!(names, vec!["a", "b"]);

    let outputs = service.infer().unwrap();
    assert_eq!(service.state(), ServiceState::Inferred);

    let sum = outputs.get("sum").unwrap().as_f32().unwrap();
    let expected = [1.5f32, 0.0, 13.0];
    for (got, want) in sum.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
    }

    service.persist(&outputs).unwrap();
    assert_eq!(service.state(), ServiceState::Persisted);
}

#[test]
fn test_missing_input_fails_before_inference() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(dir.path(), "add.onnx", &add_model(&[Some(3)]));
    let dataset = write_npz_file(dir.path(), "inputs.npz", &[("a", ramp(&[3]))]);

    let err = InferenceService::new(&model, &dataset, 1).err().unwrap();
    assert!(matches!(err, NinferError::DatasetMismatch(_)), "{}", err);
}

#[test]
fn test_wrong_shape_is_inference_failure() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(
        dir.path(),
        "identity.onnx",
        &identity_model("x", "y", &[Some(1), Some(3)]),
    );
    let dataset = write_npy_file(dir.path(), "dataset.npy", &ramp(&[1, 4]));

    let mut service = InferenceService::new(&model, &dataset, 1).unwrap();
    let err = service.run().unwrap_err();
    match err {
        NinferError::Inference(InferenceError::InvalidInput(msg)) => {
            assert!(msg.contains("'x'"), "{}", msg);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(service.state(), ServiceState::DataLoaded);
    assert!(!service.archive_path().exists());
}

#[test]
fn test_dynamic_batch_dimension_accepts_any_size() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(
        dir.path(),
        "batched.onnx",
        &identity_model("x", "y", &[None, Some(2)]),
    );
    let dataset = write_npy_file(dir.path(), "dataset.npy", &ramp(&[4, 2]));

    let mut service = InferenceService::new(&model, &dataset, 1).unwrap();
    assert_eq!(service.model().input_specs()[0].shape, vec![None, Some(2)]);

    let archive = service.run().unwrap().to_path_buf();
    assert_eq!(read_archive_f32(&archive, "y").shape(), &[4, 2]);
}

#[test]
fn test_mixed_output_types_are_archived() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(dir.path(), "two.onnx", &two_output_model());

    let dataset = dir.path().join("inputs.npz");
    {
        let mut npz = ndarray_npy::NpzWriter::new(File::create(&dataset).unwrap());
        npz.add_array("x", &ArrayD::from_shape_vec(vec![2], vec![0.5f32, 1.5]).unwrap())
            .unwrap();
        npz.add_array("ids_in", &ArrayD::from_shape_vec(vec![3], vec![7i64, 8, 9]).unwrap())
            .unwrap();
        npz.finish().unwrap();
    }

    let mut service = InferenceService::new(&model, &dataset, 1).unwrap();
    let archive = service.run().unwrap().to_path_buf();
    assert_eq!(archive_entries(&archive), vec!["copy.npy", "ids.npy"]);

    let mut npz = NpzReader::new(File::open(&archive).unwrap()).unwrap();
    let ids: ArrayD<i64> = npz.by_name("ids.npy").unwrap();
    assert_eq!(ids.iter().cloned().collect::<Vec<_>>(), vec![7, 8, 9]);
}

#[test]
fn test_repeated_runs_produce_identical_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(
        dir.path(),
        "identity.onnx",
        &identity_model("x", "y", &[Some(8)]),
    );
    let dataset = write_npy_file(dir.path(), "dataset.npy", &ramp(&[8]));

    let mut first = InferenceService::new(&model, &dataset, 1).unwrap();
    let archive = first.run().unwrap().to_path_buf();
    let once = read_archive_f32(&archive, "y");

    let archive = first.run().unwrap().to_path_buf();
    let twice = read_archive_f32(&archive, "y");
    assert_eq!(once, twice);
    assert_eq!(archive_entries(&archive), vec!["y.npy"]);

    let mut second = InferenceService::new(&model, &dataset, 1).unwrap();
    let other = read_archive_f32(second.run().unwrap(), "y");
    assert_eq!(once, other);
    assert_ne!(first.result_dir(), second.result_dir());
}

#[test]
fn test_result_dir_removed_on_drop_and_close() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(
        dir.path(),
        "identity.onnx",
        &identity_model("x", "y", &[Some(2)]),
    );
    let dataset = write_npy_file(dir.path(), "dataset.npy", &ramp(&[2]));

    let mut service = InferenceService::new(&model, &dataset, 1).unwrap();
    service.run().unwrap();
    let result_dir = service.result_dir().to_path_buf();
    assert!(result_dir.is_dir());
    drop(service);
    assert!(!result_dir.exists());

    let mut service = InferenceService::new(&model, &dataset, 1).unwrap();
    service.run().unwrap();
    let result_dir = service.result_dir().to_path_buf();
    service.close().unwrap();
    assert!(!result_dir.exists());
}

#[test]
fn test_copy_archive_requires_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(
        dir.path(),
        "identity.onnx",
        &identity_model("x", "y", &[Some(2)]),
    );
    let dataset = write_npy_file(dir.path(), "dataset.npy", &ramp(&[2]));
    let dest = dir.path().join("kept.zip");

    let mut service = InferenceService::new(&model, &dataset, 1).unwrap();
    let err = service.copy_archive_to(&dest).unwrap_err();
    assert!(matches!(err, NinferError::Persistence { .. }), "{}", err);

    service.run().unwrap();
    let copied = service.copy_archive_to(&dest).unwrap();
    assert!(copied > 0);
    drop(service);

    assert!(dest.is_file());
    assert_eq!(archive_entries(&dest), vec!["y.npy"]);
}

#[test]
fn test_concurrent_services_use_separate_directories() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(
        dir.path(),
        "identity.onnx",
        &identity_model("x", "y", &[Some(16)]),
    );
    let datasets: Vec<_> = (0..4)
        .map(|i| {
            let data = ramp(&[16]).mapv(|v| v + i as f32);
            write_npy_file(dir.path(), &format!("dataset_{}.npy", i), &data)
        })
        .collect();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = datasets
            .iter()
            .map(|dataset| {
                let model = &model;
                scope.spawn(move || {
                    let mut service = InferenceService::new(model, dataset, 1).unwrap();
                    let archive = service.run().unwrap().to_path_buf();
                    let output = read_archive_f32(&archive, "y");
                    (service.result_dir().to_path_buf(), output, service)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut dirs: Vec<_> = results.iter().map(|(d, _, _)| d.clone()).collect();
    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), 4);

    for (i, (_, output, _)) in results.iter().enumerate() {
        let expected = ramp(&[16]).mapv(|v| v + i as f32);
        for (got, want) in output.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_config_controls_archive_layout() {
    let dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let model = write_file(
        dir.path(),
        "identity.onnx",
        &identity_model("x", "y", &[Some(2)]),
    );
    let dataset = write_npy_file(dir.path(), "dataset.npy", &ramp(&[2]));

    let mut config = NinferConfig::default();
    config.output.archive_name = "results.zip".to_string();
    config.output.compression = Compression::Stored;
    config.output.temp_root = Some(root.path().to_path_buf());

    let mut service = InferenceService::with_config(&model, &dataset, &config).unwrap();
    let archive = service.run().unwrap().to_path_buf();
    assert!(archive.starts_with(root.path()));
    assert_eq!(archive.file_name().unwrap(), "results.zip");
    assert_eq!(archive_entries(&archive), vec!["y.npy"]);
}

#[test]
fn test_corrupt_model_is_backend_load_failure() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(dir.path(), "broken.onnx", b"definitely not a model");
    let dataset = write_npy_file(dir.path(), "dataset.npy", &ramp(&[2]));

    let err = InferenceService::new(&model, &dataset, 1).err().unwrap();
    match err {
        NinferError::BackendLoad { format, .. } => assert_eq!(format, ModelFormat::Onnx),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_unsupported_model_extension() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_file(dir.path(), "model.pt", b"weights");
    let dataset = write_npy_file(dir.path(), "dataset.npy", &ramp(&[2]));

    let err = InferenceService::new(&model, &dataset, 1).err().unwrap();
    assert!(matches!(err, NinferError::UnsupportedFormat { .. }), "{}", err);
}
