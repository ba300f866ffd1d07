//! Component history against a file-backed session and an on-disk pool

mod common;

use std::fs;
use std::path::Path;

use assetpool::storage::ReadOptions;
use assetpool::vcs::{
    Component, ComponentError, LocalSession, Operation, Session, SessionError, SessionRequest,
    SessionResponse,
};
use assetpool::{FieldValue, Fields, Identifier};
use common::Studio;

fn shot_render() -> Identifier {
    let mut fields = Fields::new();
    fields.insert("shot".to_string(), FieldValue::from("010"));
    Identifier::new(["render"], fields)
}

fn session(dir: &Path, user: &str) -> LocalSession {
    LocalSession::new(dir.join("revisions.json"), user)
}

/// Delegates everything except publishing, which the backend refuses
#[derive(Debug)]
struct PublishOutage(LocalSession);

impl Session for PublishOutage {
    fn execute(&self, request: &SessionRequest) -> Result<SessionResponse, SessionError> {
        if request.operation == Operation::PublishRevision {
            return Ok(SessionResponse::error("publishing is offline"));
        }
        self.0.execute(request)
    }

    fn user_id(&self) -> &str {
        self.0.user_id()
    }
}

#[test]
fn publish_stores_data_on_every_tier() {
    let studio = Studio::new();
    let pool = studio.pool();
    let lee = session(studio.dir.path(), "lee");
    let component = Component::new(&shot_render());

    let mut revision = component.create_revision(&lee, false).unwrap();
    assert_eq!(revision.version(), 1);
    assert!(!revision.is_published());

    let stored = revision
        .publish(&pool, &lee, Some("first pass"), |tx| tx.write(b"pixels"))
        .unwrap();
    assert_eq!(stored.rpath(), "demo/shots/010/render_v001.exr");
    assert!(revision.is_published());
    assert_eq!(revision.comment(), Some("first pass"));

    for path in [
        studio.local("demo/shots/010/render_v001.exr"),
        studio.archive("demo/shots/010/render_v001.exr"),
    ] {
        assert_eq!(fs::read(&path).unwrap(), b"pixels");
    }
    let meta = fs::read_to_string(studio.archive("demo/shots/010/render_v001.exr.meta")).unwrap();
    assert!(meta.contains("first pass"));

    let latest = component.latest_revision(&lee).unwrap().unwrap();
    assert!(latest.is_published());

    let next = component.create_revision(&lee, false).unwrap();
    assert_eq!(next.version(), 2);
}

#[test]
fn ownership_blocks_other_users_until_forced() {
    let studio = Studio::new();
    let lee = session(studio.dir.path(), "lee");
    let kim = session(studio.dir.path(), "kim");
    let component = Component::new(&shot_render());

    let opened = component.create_revision(&lee, false).unwrap();
    assert_eq!(opened.user_id(), "lee");

    let err = component.create_revision(&kim, false).unwrap_err();
    match err {
        ComponentError::Ownership { owner, version, .. } => {
            assert_eq!(owner, "lee");
            assert_eq!(version, 1);
        }
        other => panic!("unexpected error: {}", other),
    }

    let taken = component.create_revision(&kim, true).unwrap();
    assert_eq!(taken.id(), opened.id());
    assert_eq!(taken.user_id(), "kim");

    let stored = component.latest_revision(&lee).unwrap().unwrap();
    assert_eq!(stored.user_id(), "kim");
}

#[test]
fn failed_commit_rolls_back_written_data() {
    let studio = Studio::new();
    let pool = studio.pool();
    let outage = PublishOutage(session(studio.dir.path(), "lee"));
    let component = Component::new(&shot_render());

    let mut revision = component.create_revision(&outage, false).unwrap();
    let err = revision
        .publish(&pool, &outage, Some("doomed"), |tx| tx.write(b"pixels"))
        .unwrap_err();
    assert!(matches!(err, ComponentError::Publish { .. }));
    assert!(!revision.is_published());

    for rpath in ["demo/shots/010/render_v001.exr", "demo/shots/010/render_v001.exr.meta"] {
        assert!(!studio.local(rpath).exists(), "{} left behind", rpath);
        assert!(!studio.archive(rpath).exists(), "{} left behind", rpath);
    }

    let latest = component.latest_revision(&outage).unwrap().unwrap();
    assert!(!latest.is_published());
}

#[test]
fn failed_commit_keeps_copies_it_did_not_write() {
    let studio = Studio::new();
    let pool = studio.pool();
    let outage = PublishOutage(session(studio.dir.path(), "lee"));
    let component = Component::new(&shot_render());
    studio.put(&studio.archive("demo/shots/010/render_v001.exr"), b"pre-existing");

    let mut revision = component.create_revision(&outage, false).unwrap();
    let err = revision
        .publish(&pool, &outage, None, |tx| tx.write(b"pixels"))
        .unwrap_err();
    assert!(matches!(err, ComponentError::Publish { .. }));
    assert!(!revision.is_published());

    assert_eq!(
        fs::read(studio.archive("demo/shots/010/render_v001.exr")).unwrap(),
        b"pre-existing"
    );
    assert!(!studio.local("demo/shots/010/render_v001.exr").exists());
    assert!(!studio.local("demo/shots/010/render_v001.exr.meta").exists());
}

#[test]
fn only_the_owner_may_publish() {
    let studio = Studio::new();
    let pool = studio.pool();
    let lee = session(studio.dir.path(), "lee");
    let kim = session(studio.dir.path(), "kim");
    let component = Component::new(&shot_render());

    let mut revision = component.create_revision(&lee, false).unwrap();
    let err = revision
        .publish(&pool, &kim, None, |tx| tx.write(b"pixels"))
        .unwrap_err();
    match err {
        ComponentError::Ownership { owner, version, .. } => {
            assert_eq!(owner, "lee");
            assert_eq!(version, 1);
        }
        other => panic!("unexpected error: {}", other),
    }

    assert!(!revision.is_published());
    assert!(!studio.local("demo/shots/010/render_v001.exr").exists());
    assert!(!studio.archive("demo/shots/010/render_v001.exr").exists());
    assert!(!component.latest_revision(&lee).unwrap().unwrap().is_published());
}

#[test]
fn published_revisions_are_not_republished() {
    let studio = Studio::new();
    let pool = studio.pool();
    let lee = session(studio.dir.path(), "lee");
    let component = Component::new(&shot_render());

    let mut revision = component.create_revision(&lee, false).unwrap();
    revision
        .publish(&pool, &lee, Some("final"), |tx| tx.write(b"approved"))
        .unwrap();

    let err = revision
        .publish(&pool, &lee, Some("again"), |tx| tx.write(b"changed"))
        .unwrap_err();
    assert!(matches!(err, ComponentError::Published { .. }));
    assert_eq!(revision.comment(), Some("final"));

    let mut stale = component.latest_revision(&lee).unwrap().unwrap();
    assert!(matches!(
        stale.publish(&pool, &lee, None, |tx| tx.write(b"changed")),
        Err(ComponentError::Published { .. })
    ));

    for path in [
        studio.local("demo/shots/010/render_v001.exr"),
        studio.archive("demo/shots/010/render_v001.exr"),
    ] {
        assert_eq!(fs::read(&path).unwrap(), b"approved");
    }
}

#[test]
fn failed_staging_writes_nothing() {
    let studio = Studio::new();
    let pool = studio.pool();
    let lee = session(studio.dir.path(), "lee");
    let component = Component::new(&shot_render());

    let mut revision = component.create_revision(&lee, false).unwrap();
    let err = revision
        .publish(&pool, &lee, None, |_| {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "render crashed"))
        })
        .unwrap_err();

    assert!(matches!(err, ComponentError::Stage { .. }));
    assert!(!studio.local("demo/shots/010/render_v001.exr").exists());
    assert!(!component.latest_revision(&lee).unwrap().unwrap().is_published());
}

#[test]
fn checkout_item_falls_back_to_published_data() {
    let studio = Studio::new();
    let pool = studio.pool();
    let lee = session(studio.dir.path(), "lee");
    let component = Component::new(&shot_render());

    let mut revision = component.create_revision(&lee, false).unwrap();
    revision
        .publish(&pool, &lee, None, |tx| tx.write(b"published"))
        .unwrap();
    fs::remove_file(studio.local("demo/shots/010/render_v001.exr")).unwrap();

    let mut checkout = revision.storage_item(&pool, true).unwrap();
    assert_eq!(checkout.rpath(), "demo/shots/010/wip/render_v001.exr");
    assert_eq!(
        checkout.chain(),
        vec![
            ("local", "demo/shots/010/wip/render_v001.exr"),
            ("local", "demo/shots/010/render_v001.exr"),
            ("archive", "demo/shots/010/render_v001.exr"),
        ]
    );

    let data = checkout
        .read(ReadOptions {
            upstream: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(data.as_deref(), Some(&b"published"[..]));
}

#[test]
fn history_is_listed_newest_first() {
    let studio = Studio::new();
    let pool = studio.pool();
    let lee = session(studio.dir.path(), "lee");
    let component = Component::new(&shot_render());

    for pass in ["blocking", "lighting", "final"] {
        let mut revision = component.create_revision(&lee, false).unwrap();
        revision
            .publish(&pool, &lee, Some(pass), |tx| tx.write(pass.as_bytes()))
            .unwrap();
    }

    let history = component.revisions(&lee, None).unwrap();
    let versions: Vec<i64> = history.iter().map(|r| r.version()).collect();
    assert_eq!(versions, vec![3, 2, 1]);
    assert_eq!(history[0].comment(), Some("final"));

    let recent = component.revisions(&lee, Some(2)).unwrap();
    assert_eq!(recent.len(), 2);

    history[2].remove(&lee).unwrap();
    let versions: Vec<i64> = component
        .revisions(&lee, None)
        .unwrap()
        .iter()
        .map(|r| r.version())
        .collect();
    assert_eq!(versions, vec![3, 2]);
    // stored bytes outlive the record
    assert!(studio.archive("demo/shots/010/render_v001.exr").is_file());
}

#[test]
fn components_are_found_by_tags_and_fields() {
    let studio = Studio::new();
    let lee = session(studio.dir.path(), "lee");

    let render = Component::new(&shot_render());
    render.create_revision(&lee, false).unwrap();

    let mut other_fields = Fields::new();
    other_fields.insert("shot".to_string(), FieldValue::from("020"));
    let other = Component::new(&Identifier::new(["render"], other_fields));
    other.create_revision(&lee, false).unwrap();

    let mut wanted = Fields::new();
    wanted.insert("shot".to_string(), FieldValue::from("020"));
    let found = Component::find_components(&lee, &assetpool::domain::tag_set(["render"]), &wanted, None)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), other.id());

    assert_eq!(Component::find(&lee, render.id()).unwrap().unwrap().id(), render.id());
    render.remove(&lee).unwrap();
    assert!(Component::find(&lee, render.id()).unwrap().is_none());
}
