//! End-to-end flows across builder, store, tarball, and bundle.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use modist::{
    Artifact, Builder, Digest, Error, Format, MediaType, ProgressSink, Reporter, Store, Target,
    bundle, tarball,
};

fn write_gguf(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

#[tokio::test]
async fn package_store_and_bundle_single_gguf() {
    let dir = tempfile::tempdir().unwrap();
    let weights = write_gguf(dir.path(), "m.gguf", b"raw model bytes");
    let store = Store::open(dir.path().join("store")).unwrap();

    let id = Builder::from_gguf(&weights)
        .unwrap()
        .build(
            Target::Store {
                store: &store,
                tags: vec!["ai/demo:v1".into()],
            },
            &ProgressSink::disabled(),
        )
        .await
        .unwrap();

    // The manifest carries exactly one gguf layer addressing the raw bytes.
    let stored = store.read("ai/demo:v1").unwrap();
    let manifest = stored.manifest().unwrap();
    assert_eq!(manifest.layers.len(), 1);
    assert_eq!(manifest.layers[0].media_type, MediaType::Gguf);
    assert_eq!(manifest.layers[0].digest, Digest::sha256(b"raw model bytes"));
    assert_eq!(stored.id().unwrap(), id);

    // Bundling materializes the weights under the runtime name.
    let bundle_dir = dir.path().join("bundle");
    let bundle = bundle::unpack(&bundle_dir, &stored).unwrap();
    assert_eq!(bundle.format(), Format::Gguf);
    assert_eq!(
        fs::read(bundle_dir.join("model.gguf")).unwrap(),
        b"raw model bytes"
    );

    // And the bundle reparses to the same shape.
    let parsed = bundle::parse(&bundle_dir).unwrap();
    assert_eq!(parsed.weight_paths(), bundle.weight_paths());
}

#[tokio::test]
async fn sharded_model_round_trips_through_tarball() {
    let dir = tempfile::tempdir().unwrap();
    for i in 1..=2 {
        write_gguf(
            dir.path(),
            &format!("m-0000{i}-of-00002.gguf"),
            format!("shard {i}").as_bytes(),
        );
    }
    let store = Store::open(dir.path().join("store")).unwrap();

    let id = Builder::from_gguf(dir.path().join("m-00001-of-00002.gguf"))
        .unwrap()
        .build(
            Target::Store {
                store: &store,
                tags: vec!["ai/sharded:v1".into()],
            },
            &ProgressSink::disabled(),
        )
        .await
        .unwrap();

    // Export from the first store, load into a second.
    let artifact = store.read("ai/sharded:v1").unwrap();
    let tar = dir.path().join("model.tar");
    tarball::export_to_file(&artifact, &tar).unwrap();

    let other = Store::open(dir.path().join("store2")).unwrap();
    let loaded = tarball::load(
        &other,
        fs::File::open(&tar).unwrap(),
        &["ai/sharded:copy".into()],
        &ProgressSink::disabled(),
    )
    .unwrap();
    assert_eq!(loaded, id);

    let reread = other.read("ai/sharded:copy").unwrap();
    assert_eq!(
        reread.raw_manifest().unwrap(),
        artifact.raw_manifest().unwrap()
    );

    let bundle_dir = dir.path().join("bundle");
    bundle::unpack(&bundle_dir, &reread).unwrap();
    assert_eq!(
        fs::read(bundle_dir.join("model-00001-of-00002.gguf")).unwrap(),
        b"shard 1"
    );
    assert_eq!(
        fs::read(bundle_dir.join("model-00002-of-00002.gguf")).unwrap(),
        b"shard 2"
    );
}

#[tokio::test]
async fn config_rewrite_reuses_layers_and_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    let weights = write_gguf(dir.path(), "m.gguf", &vec![7u8; 64 * 1024]);
    let store = Store::open(dir.path().join("store")).unwrap();

    let progress_file = dir.path().join("progress.ndjson");
    {
        let reporter = Reporter::new(Box::new(fs::File::create(&progress_file).unwrap()));
        Builder::from_gguf(&weights)
            .unwrap()
            .build(
                Target::Store {
                    store: &store,
                    tags: vec!["ai/demo:base".into()],
                },
                &reporter.sink(),
            )
            .await
            .unwrap();
        reporter.sink().success("Model written successfully");
        reporter.finish();
    }

    // Progress lines are one JSON object per line with the wire fields.
    let lines = fs::read_to_string(&progress_file).unwrap();
    let mut saw_progress = false;
    for line in lines.lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        match value["type"].as_str().unwrap() {
            "progress" => {
                saw_progress = true;
                assert!(value["layer"]["id"].as_str().unwrap().starts_with("sha256:"));
            }
            "success" | "error" => {}
            other => panic!("unexpected message type {other}"),
        }
    }
    assert!(saw_progress, "expected at least one progress line");

    // Derive a context-size variant; only config and manifest are new.
    let base = Arc::new(store.read("ai/demo:base").unwrap());
    let base_id = base.id().unwrap();
    let derived_id = Builder::from_model(base)
        .unwrap()
        .with_context_size(16_384)
        .build(
            Target::Store {
                store: &store,
                tags: vec!["ai/demo:ctx16k".into()],
            },
            &ProgressSink::disabled(),
        )
        .await
        .unwrap();
    assert_ne!(base_id, derived_id);

    // Both entries share the single weight blob.
    let (deleted, _) = store.delete("ai/demo:base", false).unwrap();
    assert_eq!(deleted, base_id.to_string());
    let survivor = store.read("ai/demo:ctx16k").unwrap();
    let mut out = Vec::new();
    use std::io::Read as _;
    survivor.layers().unwrap()[0]
        .open()
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out.len(), 64 * 1024);
}

#[test]
fn delete_by_tag_semantics_match_source_behavior() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("store")).unwrap();
    let weights = write_gguf(dir.path(), "m.gguf", b"w");

    let artifact = {
        let layer: Arc<dyn modist::Layer> =
            Arc::new(modist::FileLayer::new(&weights, MediaType::Gguf));
        let mut config = modist::ModelConfig::default();
        config.format = Some(Format::Gguf);
        modist::LocalArtifact::new(vec![layer], config)
    };
    store
        .write(
            &artifact,
            &["ai/m:a".into(), "ai/m:b".into()],
            &ProgressSink::disabled(),
        )
        .unwrap();

    // Multi-tagged: delete-by-tag only untags.
    store.delete("ai/m:a", false).unwrap();
    assert!(store.read("ai/m:b").is_ok());

    // Last tag: the whole entry goes.
    store.delete("ai/m:b", false).unwrap();
    assert!(matches!(store.read("ai/m:b"), Err(Error::ModelNotFound(_))));
    assert!(store.list().unwrap().is_empty());
}
