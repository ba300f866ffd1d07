//! Shared on-disk fixture: a schema tree and a two-tier pool config

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assetpool::storage::{Settings, StoragePool};
use tempfile::TempDir;

pub const POOL_YAML: &str = r#"
project: demo
storages:
  - name: local
    schema: schema
    accessor: {name: fs, kwargs: {root: local}}
    fields:
      _version_: {format: 03d, type: int}
  - name: archive
    schema: schema
    tag_mask: "(render | frames) & ^_checkout_"
    accessor: {name: fs, kwargs: {root: archive}}
    fields:
      _version_: {format: 03d, type: int}
"#;

/// ```text
/// schema/
///   project/            format '{project}'
///     shots/shot/       format '{shot}'
///       anchor__render            render_v{_version_:03d}.exr
///       anchor__render_checkout   wip/render_v{_version_:03d}.exr
///       anchor__frames            frames/shot.{_index_:04d}.exr (sequence)
///     assets/asset/     format '{asset}'
///       anchor__textures          textures/{_suffix_} (collection)
///     config/           triggered by render
///       defaults.txt
/// ```
pub struct Studio {
    pub dir: TempDir,
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

impl Studio {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let schema = dir.path().join("schema");

        write(&schema, "project.yml", "format: '{project}'\n");
        fs::create_dir_all(schema.join("project/shots/shot")).unwrap();
        write(&schema, "project/shots/shot.yml", "format: '{shot}'\n");
        write(
            &schema,
            "project/shots/shot/anchor__render.yml",
            "tags: [render]\nformat: 'render_v{_version_:03d}.exr'\n",
        );
        write(
            &schema,
            "project/shots/shot/anchor__render_checkout.yml",
            "tags: [render, _checkout_]\nformat: 'wip/render_v{_version_:03d}.exr'\n",
        );
        write(
            &schema,
            "project/shots/shot/anchor__frames.yml",
            "tags: [frames]\ntype: sequence\nformat: 'frames/shot.{_index_:04d}.exr'\n",
        );

        fs::create_dir_all(schema.join("project/assets/asset")).unwrap();
        write(&schema, "project/assets/asset.yml", "format: '{asset}'\n");
        write(
            &schema,
            "project/assets/asset/anchor__textures.yml",
            "tags: [textures]\ntype: collection\nformat: 'textures/{_suffix_}'\n",
        );

        write(
            &schema,
            "project/config.yml",
            "triggers:\n  - tag_mask: render\n    propagate: true\n",
        );
        write(&schema, "project/config/defaults.txt", "fps=24\n");

        write(dir.path(), "pool.yml", POOL_YAML);

        Self { dir }
    }

    pub fn pool_path(&self) -> PathBuf {
        self.dir.path().join("pool.yml")
    }

    pub fn settings(user: &str) -> Settings {
        Settings {
            user: Some(user.to_string()),
            ..Default::default()
        }
    }

    pub fn pool(&self) -> StoragePool {
        self.pool_as("lee")
    }

    pub fn pool_as(&self, user: &str) -> StoragePool {
        StoragePool::load(&self.pool_path(), &Self::settings(user)).unwrap()
    }

    /// Writes another pool file next to the default one
    pub fn write_pool(&self, name: &str, yaml: &str) -> PathBuf {
        write(self.dir.path(), name, yaml);
        self.dir.path().join(name)
    }

    pub fn pool_from(&self, path: &Path) -> StoragePool {
        StoragePool::load(path, &Self::settings("lee")).unwrap()
    }

    pub fn local(&self, rpath: &str) -> PathBuf {
        self.dir.path().join("local").join(rpath)
    }

    pub fn archive(&self, rpath: &str) -> PathBuf {
        self.dir.path().join("archive").join(rpath)
    }

    pub fn put(&self, path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}
