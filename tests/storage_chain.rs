//! Pool behaviour over real directories: a `local` tier in front of an
//! `archive` tier that only serves published renders and frames.

mod common;

use std::fs;

use assetpool::domain::tag_set;
use assetpool::storage::{Cursor, ReadOptions, WriteOptions, WriteOrder};
use assetpool::{FieldValue, Fields, StorageError};
use common::Studio;

fn render_fields(version: i64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("shot".to_string(), FieldValue::from("010"));
    fields.insert("_version_".to_string(), FieldValue::Int(version));
    fields
}

#[test]
fn render_chain_spans_both_tiers() {
    let studio = Studio::new();
    let pool = studio.pool();

    let render = pool.get_item(&tag_set(["render"])).unwrap();
    assert_eq!(render.storage_names(), vec!["local", "archive"]);

    let wip = pool.get_item(&tag_set(["render", "_checkout_"])).unwrap();
    assert_eq!(wip.storage_names(), vec!["local"]);

    let textures = pool.get_item(&tag_set(["textures"])).unwrap();
    assert_eq!(textures.chain_len(), 1);

    assert!(pool.get_item(&tag_set(["unknown"])).is_none());
}

#[test]
fn rpath_follows_schema_and_field_format() {
    let studio = Studio::new();
    let pool = studio.pool();

    let item = pool
        .get_item(&tag_set(["render"]))
        .unwrap()
        .get_storage_item(&render_fields(3))
        .unwrap();

    assert_eq!(item.rpath(), "demo/shots/010/render_v003.exr");
    assert_eq!(
        item.filesystem_path().unwrap(),
        studio.local("demo/shots/010/render_v003.exr")
    );
}

#[test]
fn pull_materializes_archive_data_locally() {
    let studio = Studio::new();
    let pool = studio.pool();
    studio.put(&studio.archive("demo/shots/010/render_v001.exr"), b"pixels");

    let mut item = pool
        .get_item(&tag_set(["render"]))
        .unwrap()
        .get_storage_item(&render_fields(1))
        .unwrap();

    assert!(!item.exists().unwrap());
    assert!(item.exists_upstream().unwrap());

    assert_eq!(item.pull(false, false).unwrap().as_deref(), Some(&b"pixels"[..]));
    assert!(item.exists().unwrap());
    assert_eq!(
        fs::read(studio.local("demo/shots/010/render_v001.exr")).unwrap(),
        b"pixels"
    );

    // already local: nothing to do
    assert!(item.pull(false, false).unwrap().is_none());
}

#[test]
fn write_skips_existing_tiers_unless_forced() {
    let studio = Studio::new();
    let pool = studio.pool();
    studio.put(&studio.archive("demo/shots/010/render_v002.exr"), b"archived");

    let item = pool
        .get_item(&tag_set(["render"]))
        .unwrap()
        .get_storage_item(&render_fields(2))
        .unwrap();

    item.write(b"fresh", WriteOptions::default()).unwrap();
    assert_eq!(fs::read(studio.local("demo/shots/010/render_v002.exr")).unwrap(), b"fresh");
    assert_eq!(
        fs::read(studio.archive("demo/shots/010/render_v002.exr")).unwrap(),
        b"archived"
    );

    item.write(
        b"fresh",
        WriteOptions {
            force: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        fs::read(studio.archive("demo/shots/010/render_v002.exr")).unwrap(),
        b"fresh"
    );
}

#[test]
fn read_prefers_the_requested_end_of_the_chain_and_falls_back() {
    let studio = Studio::new();
    let pool = studio.pool();
    let mut item = pool
        .get_item(&tag_set(["render"]))
        .unwrap()
        .get_storage_item(&render_fields(4))
        .unwrap();
    let from_archive = ReadOptions {
        upstream: false,
        ..Default::default()
    };

    // only the local tier holds it; the archive-first read falls back
    studio.put(&studio.local("demo/shots/010/render_v004.exr"), b"local copy");
    assert_eq!(item.read(from_archive).unwrap().as_deref(), Some(&b"local copy"[..]));

    studio.put(&studio.archive("demo/shots/010/render_v004.exr"), b"archived copy");
    assert_eq!(
        item.read(from_archive).unwrap().as_deref(),
        Some(&b"archived copy"[..])
    );
    assert_eq!(
        item.read(ReadOptions {
            upstream: true,
            ..Default::default()
        })
        .unwrap()
        .as_deref(),
        Some(&b"local copy"[..])
    );
}

#[test]
fn upstream_first_write_stops_before_local_when_upstream_fails() {
    let studio = Studio::new();
    let pool = studio.pool();
    let item = pool
        .get_item(&tag_set(["render"]))
        .unwrap()
        .get_storage_item(&render_fields(1))
        .unwrap();
    // a plain file where the archive needs a directory
    studio.put(&studio.archive("demo/shots/010"), b"in the way");

    let err = item
        .write(
            b"pixels",
            WriteOptions {
                order: Some(WriteOrder::UpstreamFirst),
                ..Default::default()
            },
        )
        .unwrap_err();
    match err {
        StorageError::Accessor { storage, op, .. } => {
            assert_eq!(storage, "archive");
            assert_eq!(op, "write");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!studio.local("demo/shots/010/render_v001.exr").exists());

    // local-first lands the local copy before reaching the archive
    assert!(item
        .write(
            b"pixels",
            WriteOptions {
                order: Some(WriteOrder::LocalFirst),
                ..Default::default()
            },
        )
        .is_err());
    assert_eq!(fs::read(studio.local("demo/shots/010/render_v001.exr")).unwrap(), b"pixels");
}

#[test]
fn metadata_round_trips_and_legacy_sidecars_are_read() {
    let studio = Studio::new();
    let pool = studio.pool();
    let meta_item = pool.get_item(&tag_set(["render"])).unwrap();

    let mut item = meta_item.get_storage_item(&render_fields(4)).unwrap();
    item.set_metadata("note", "first light");
    item.write(
        b"v4",
        WriteOptions {
            with_metadata: true,
            current_item_only: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(studio.local("demo/shots/010/render_v004.exr.meta").is_file());

    let mut reread = meta_item.get_storage_item(&render_fields(4)).unwrap();
    reread
        .read(ReadOptions {
            with_metadata: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(reread.metadata()["note"], "first light");
    assert!(reread.metadata().contains_key("date"));

    studio.put(&studio.archive("demo/shots/010/render_v005.exr"), b"v5");
    studio.put(
        &studio.archive("demo/shots/010/render_v005.exr.txt"),
        b"user: kim\nnote: approved\nby the director\n",
    );
    let mut legacy = meta_item.get_storage_item(&render_fields(5)).unwrap();
    legacy
        .read(ReadOptions {
            with_metadata: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(legacy.metadata()["user"], "kim");
    assert_eq!(legacy.metadata()["comment"], "approved\nby the director");
}

#[test]
fn remove_with_propagate_clears_every_tier() {
    let studio = Studio::new();
    let pool = studio.pool();
    let item = pool
        .get_item(&tag_set(["render"]))
        .unwrap()
        .get_storage_item(&render_fields(6))
        .unwrap();

    item.write(b"doomed", WriteOptions::default()).unwrap();
    item.remove(false).unwrap();
    assert!(!studio.local("demo/shots/010/render_v006.exr").exists());
    assert!(studio.archive("demo/shots/010/render_v006.exr").exists());

    item.remove(true).unwrap();
    assert!(!studio.archive("demo/shots/010/render_v006.exr").exists());
}

#[test]
fn sequence_cursor_lists_frames_on_disk() {
    let studio = Studio::new();
    let pool = studio.pool();
    for frame in [1, 2, 5] {
        let rpath = format!("demo/shots/010/frames/shot.{:04}.exr", frame);
        studio.put(&studio.archive(&rpath), b"frame");
    }
    // unrelated files in the same directory are ignored
    studio.put(&studio.archive("demo/shots/010/frames/notes.txt"), b"");

    let mut fields = Fields::new();
    fields.insert("shot".to_string(), FieldValue::from("010"));
    let cursor = Cursor::new(pool.get_item(&tag_set(["frames"])).unwrap(), fields);

    assert!(cursor.values(false).unwrap().is_empty());
    assert_eq!(
        cursor.values(true).unwrap(),
        vec![FieldValue::Int(1), FieldValue::Int(2), FieldValue::Int(5)]
    );

    let latest = cursor.latest(true).unwrap().unwrap();
    assert_eq!(latest.rpath(), "demo/shots/010/frames/shot.0005.exr");

    assert_eq!(cursor.pull(false).unwrap(), 3);
    assert_eq!(cursor.values(false).unwrap().len(), 3);
}

#[test]
fn collection_cursor_walks_nested_files() {
    let studio = Studio::new();
    let pool = studio.pool();
    studio.put(&studio.local("demo/assets/chair/textures/wood.png"), b"");
    studio.put(&studio.local("demo/assets/chair/textures/maps/normal.png"), b"");

    let mut fields = Fields::new();
    fields.insert("asset".to_string(), FieldValue::from("chair"));
    let cursor = Cursor::new(pool.get_item(&tag_set(["textures"])).unwrap(), fields);

    assert_eq!(
        cursor.values(false).unwrap(),
        vec![FieldValue::from("maps/normal.png"), FieldValue::from("wood.png")]
    );
}

#[test]
fn collection_cursor_skips_sidecars_and_temp_files() {
    let studio = Studio::new();
    let pool = studio.pool();
    let textures = pool.get_item(&tag_set(["textures"])).unwrap();

    let mut fields = Fields::new();
    fields.insert("asset".to_string(), FieldValue::from("chair"));
    let mut wood_fields = fields.clone();
    wood_fields.insert("_suffix_".to_string(), FieldValue::from("wood.png"));
    let mut wood = textures.get_storage_item(&wood_fields).unwrap();
    wood.set_metadata("artist", "lee");
    wood.write(
        b"grain",
        WriteOptions {
            with_metadata: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(studio.local("demo/assets/chair/textures/wood.png.meta").is_file());

    studio.put(&studio.local("demo/assets/chair/textures/maps/normal.png"), b"");
    studio.put(&studio.local("demo/assets/chair/textures/maps/normal.png.txt"), b"artist: kim\n");
    studio.put(
        &studio.local("demo/assets/chair/textures/wood.png__0123456789abcdef0123456789abcdef"),
        b"partial",
    );
    studio.put(&studio.local("demo/assets/chair/textures/readme.txt"), b"notes");

    let cursor = Cursor::new(textures, fields);
    assert_eq!(
        cursor.values(false).unwrap(),
        vec![
            FieldValue::from("maps/normal.png"),
            FieldValue::from("readme.txt"),
            FieldValue::from("wood.png"),
        ]
    );
}

#[test]
fn build_structure_scaffolds_triggered_nodes() {
    let studio = Studio::new();
    let pool = studio.pool();

    let reports = pool.build_structure(&tag_set(["render"]), &render_fields(1));
    let names: Vec<&str> = reports.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["local", "archive"]);

    for (_, report) in &reports {
        assert!(report.is_complete(), "{:?}", report.failures);
    }
    assert!(studio.local("demo/shots/010").is_dir());
    assert_eq!(
        fs::read_to_string(studio.local("demo/config/defaults.txt")).unwrap(),
        "fps=24\n"
    );
    assert!(studio.archive("demo/config/defaults.txt").is_file());

    // second run finds everything in place
    let again = pool.build_structure(&tag_set(["render"]), &render_fields(1));
    assert!(again.iter().all(|(_, report)| report.built.is_empty()));
}

#[test]
fn filenames_resolve_back_to_items() {
    let studio = Studio::new();
    let pool = studio.pool();

    let path = studio.archive("demo/shots/010/render_v007.exr");
    let item = pool
        .storage_item_from_filename(&path.to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(item.tags(), &tag_set(["render"]));
    assert_eq!(item.fields()["_version_"], FieldValue::Int(7));
    assert_eq!(item.rpath(), "demo/shots/010/render_v007.exr");

    let stray = studio.local("demo/shots/010/stray.bin");
    assert!(pool
        .storage_item_from_filename(&stray.to_string_lossy())
        .unwrap()
        .is_none());

    let err = pool
        .storage_item_from_filename("/mnt/elsewhere/render_v001.exr")
        .unwrap_err();
    assert!(matches!(err, StorageError::ProjectNameNotFound { .. }));
}

#[test]
fn filenames_under_a_mount_named_like_the_project_resolve() {
    let studio = Studio::new();
    let pool_path = studio.write_pool(
        "nested.yml",
        &common::POOL_YAML
            .replace("root: local", "root: demo/local")
            .replace("root: archive", "root: demo/archive"),
    );
    let pool = studio.pool_from(&pool_path);

    // the mount itself holds a `/demo/` component before the rpath does
    let path = studio.dir.path().join("demo/local/demo/shots/010/render_v007.exr");
    let item = pool
        .storage_item_from_filename(&path.to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(item.rpath(), "demo/shots/010/render_v007.exr");
    assert_eq!(item.fields()["_version_"], FieldValue::Int(7));
    assert_eq!(item.storage().name(), "local");
}
