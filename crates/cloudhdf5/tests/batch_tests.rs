//! Batch reads, failure isolation and the host adapter.

mod common;

use std::sync::Arc;

use cloudhdf5::{Array, ArrayData, Engine, ErrorKind, OpenOptions, Session};
use common::*;

fn faulty_session() -> (Legacy, Arc<FaultyBackend>, Session) {
    init_logging();
    let legacy = legacy_file();
    let backend = FaultyBackend::new(legacy.bytes.clone());
    let session = Session::open_backend(backend.clone(), config()).unwrap();
    (legacy, backend, session)
}

// ---------------------------------------------------------------------------
// read_many
// ---------------------------------------------------------------------------

#[test]
fn batch_reads_every_path() {
    let s = open(legacy_file().bytes);
    let batch = s.read_many(&["/counts", "/grid", "/sub/flags"]);
    assert_eq!(batch.len(), 3);
    assert_eq!(batch.failures(), 0);
    let order: Vec<&str> = batch.iter().map(|(p, _)| p).collect();
    assert_eq!(order, vec!["/counts", "/grid", "/sub/flags"]);
    let flags = batch.get("/sub/flags").unwrap().as_ref().unwrap();
    assert_eq!(flags.as_i32(), Some(&[7, 8, 9][..]));
}

#[test]
fn one_failing_variable_leaves_the_rest_intact() {
    let (legacy, backend, s) = faulty_session();
    backend.fail_reads_at(legacy.grid_chunks[0]);

    let batch = s.read_many(&["/counts", "/grid", "/nope"]);
    assert_eq!(batch.failures(), 2);
    assert_eq!(batch.get("/counts").unwrap().as_ref().unwrap().as_i32(), Some(&COUNTS[..]));
    let grid_err = batch.get("/grid").unwrap().as_ref().unwrap_err();
    assert_eq!(grid_err.kind(), ErrorKind::Io, "{grid_err}");
    let missing = batch.get("/nope").unwrap().as_ref().unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::PathNotFound);

    // The session stays usable, and a selection that avoids the failing
    // request still succeeds.
    let tail = s
        .variable("/grid")
        .unwrap()
        .read(Some(&cloudhdf5::Hyperslab::from_ranges(&[2..4, 2..4])))
        .unwrap();
    assert_eq!(tail.as_f32().unwrap()[0], grid_value(2, 2));
}

#[test]
fn transient_failures_are_retried_a_bounded_number_of_times() {
    let (legacy, backend, s) = faulty_session();
    let counts = s.variable("/counts").unwrap();
    backend.fail_reads_at(legacy.counts_data);
    let before = backend.reads();
    let err = counts.read(None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    let attempts = backend.reads() - before;
    assert_eq!(attempts, u64::from(config().retry_count) + 1);
}

#[test]
fn short_answers_fail_the_read_without_panicking() {
    let (legacy, backend, s) = faulty_session();
    backend.truncate_reads_at(legacy.grid_chunks[0]);
    let before = backend.reads();

    let batch = s.read_many(&["/counts", "/grid"]);
    assert_eq!(batch.failures(), 1);
    assert_eq!(batch.get("/counts").unwrap().as_ref().unwrap().as_i32(), Some(&COUNTS[..]));
    let grid_err = batch.get("/grid").unwrap().as_ref().unwrap_err();
    assert_eq!(grid_err.kind(), ErrorKind::Io, "{grid_err}");
    // The short request was retried before giving up.
    assert!(backend.reads() - before > u64::from(config().retry_count));
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[test]
fn engine_loads_a_group_as_a_dataset() {
    let s = open(legacy_file().bytes);
    let mut engine = Engine::new();
    engine.register_converter("counts", |a: Array| {
        let doubled = a.as_i32().unwrap_or_default().iter().map(|v| v * 2).collect();
        Array::new(a.shape().to_vec(), ArrayData::I32(doubled))
    });

    let ds = engine.load(&s, &OpenOptions::default().drop_variables(["sparse"])).unwrap();
    assert_eq!(ds.group, "/");
    assert_eq!(ds.variable_names(), vec!["counts", "grid"]);
    assert!(ds.attributes.contains_key("title"));

    let counts = ds.variable("counts").unwrap();
    assert_eq!(counts.path, "/counts");
    assert_eq!(counts.data.as_i32(), Some(&[6, 2, 8, 2, 10, 18][..]));
    assert!(counts.attributes.contains_key("units"));
    assert_eq!(ds.variable("grid").unwrap().data.shape(), &[4, 4]);
}

#[test]
fn engine_reads_nested_groups() {
    let s = open(legacy_file().bytes);
    let ds = Engine::new().load(&s, &OpenOptions::default().group("/sub")).unwrap();
    assert_eq!(ds.group, "/sub");
    assert_eq!(ds.variable_names(), vec!["alias", "flags"]);
    assert_eq!(ds.variable("alias").unwrap().data.as_i32(), Some(&COUNTS[..]));
}

#[test]
fn engine_rejects_shape_changing_converters() {
    let s = open(legacy_file().bytes);
    let mut engine = Engine::new();
    engine.register_converter("grid", |_: Array| Array::new(vec![1], ArrayData::F32(vec![0.0])));
    let err = engine.load(&s, &OpenOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
}

#[test]
fn engine_surfaces_the_first_read_failure() {
    let (legacy, backend, s) = faulty_session();
    backend.fail_reads_at(legacy.grid_chunks[0]);
    let err = Engine::new().load(&s, &OpenOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    let ds = Engine::new()
        .load(&s, &OpenOptions::default().drop_variables(["grid"]))
        .unwrap();
    assert_eq!(ds.variable_names(), vec!["counts", "sparse"]);
}

#[test]
fn engine_opens_local_files() {
    init_logging();
    let mut file = tempfile::Builder::new().suffix(".h5").tempfile().unwrap();
    std::io::Write::write_all(&mut file, &legacy_file().bytes).unwrap();
    let path = file.path().to_str().unwrap();
    assert!(Engine::guess_can_open(path));

    let options = OpenOptions::default().config(config()).drop_variables(["grid", "sparse"]);
    let ds = Engine::new().open_dataset(path, &options).unwrap();
    assert_eq!(ds.variable_names(), vec!["counts"]);
}
