//! # Schema
//!
//! A schema is a directory tree mirroring the layout assets are stored in.
//!
//! | Entry | Becomes |
//! |-------|---------|
//! | directory | `Dir` node, basename from `<dir>.yml` `format` or its name |
//! | plain file | `File` node, its bytes seed new files |
//! | `anchor__*.yml` | `Anchor` node claiming the `tags` listed inside |
//! | other `*.yml` | sidecar for the entry with the same stem |
//!
//! Sidecars may declare `format`, `type` (`file`/`sequence`/`collection`)
//! and `triggers` (`[{tag_mask, propagate}]`). Templates are computed once
//! at load; the loaded tree is immutable and shared process-wide through
//! [`SchemaRegistry`].

mod node;
mod registry;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::{FieldFormatter, Fields, TagSet};
use crate::storage::Accessor;

pub use node::{strip_display_specs, NodeConfig, NodeKind, SchemaNode, Trigger};
pub use registry::SchemaRegistry;

use node::{is_anchor_file, is_config_file, sidecar_path};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Schema directory '{0}' doesn't exist")]
    NotFound(PathBuf),

    #[error("Failed to read schema entry '{path}': {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Invalid schema config '{path}': {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("Tags [{tags}] are claimed by both '{first}' and '{second}'")]
    DuplicateAnchor {
        tags: String,
        first: PathBuf,
        second: PathBuf,
    },
}

/// Node that could not be scaffolded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildFailure {
    pub template: String,
    pub reason: String,
}

/// Outcome of [`SchemaTree::build_structure`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    /// Rpaths created by this call
    pub built: Vec<String>,
    pub failures: Vec<BuildFailure>,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, node: &SchemaNode, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(template = node.template(), %reason, "skipping schema node");
        self.failures.push(BuildFailure {
            template: node.template().to_string(),
            reason,
        });
    }
}

/// Loaded, immutable schema
#[derive(Debug)]
pub struct SchemaTree {
    root: PathBuf,
    nodes: Vec<SchemaNode>,
    anchors: BTreeMap<TagSet, usize>,
}

impl SchemaTree {
    /// Walks a schema directory and builds its node tree
    pub fn load(root: &Path) -> Result<Self, SchemaError> {
        if !root.is_dir() {
            return Err(SchemaError::NotFound(root.to_path_buf()));
        }

        let mut tree = SchemaTree {
            root: root.to_path_buf(),
            nodes: Vec::new(),
            anchors: BTreeMap::new(),
        };
        let mut by_path: HashMap<PathBuf, usize> = HashMap::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        for entry in walker {
            let entry = entry.map_err(|e| SchemaError::Io {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
            let path = entry.path().to_path_buf();
            let parent = path.parent().and_then(|p| by_path.get(p)).copied();

            let (kind, config) = if entry.file_type().is_dir() {
                (NodeKind::Dir, read_config(&sidecar_path(&path))?)
            } else if is_anchor_file(&path) {
                (NodeKind::Anchor, read_config(&path)?)
            } else if is_config_file(&path) {
                continue;
            } else {
                (NodeKind::File, read_config(&sidecar_path(&path))?)
            };

            let idx = tree.push(path.clone(), kind, parent, config);
            by_path.insert(path, idx);

            if kind == NodeKind::Anchor {
                tree.register_anchor(idx)?;
            }
        }

        debug!(
            root = %root.display(),
            nodes = tree.nodes.len(),
            anchors = tree.anchors.len(),
            "loaded schema"
        );

        Ok(tree)
    }

    fn push(
        &mut self,
        path: PathBuf,
        kind: NodeKind,
        parent: Option<usize>,
        config: NodeConfig,
    ) -> usize {
        let mut node = SchemaNode {
            path,
            kind,
            parent,
            config,
            template: String::new(),
            triggers: Vec::new(),
        };

        let basename = node.basename();
        let parent_node = parent.map(|p| &self.nodes[p]);

        node.template = match parent_node {
            Some(p) if basename.is_empty() => p.template.clone(),
            Some(p) => format!("{}/{}", p.template, basename),
            None => basename,
        };

        node.triggers = node.config.triggers.clone();
        if let Some(p) = parent_node {
            node.triggers
                .extend(p.triggers.iter().filter(|t| t.propagate).cloned());
        }

        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn register_anchor(&mut self, idx: usize) -> Result<(), SchemaError> {
        let node = &self.nodes[idx];
        let tags = node.tags();
        if tags.is_empty() {
            debug!(path = %node.path.display(), "anchor without tags ignored");
            return Ok(());
        }

        if let Some(&existing) = self.anchors.get(&tags) {
            return Err(SchemaError::DuplicateAnchor {
                tags: tags.iter().cloned().collect::<Vec<_>>().join(", "),
                first: self.nodes[existing].path.clone(),
                second: node.path.clone(),
            });
        }

        self.anchors.insert(tags, idx);
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn nodes(&self) -> &[SchemaNode] {
        &self.nodes
    }

    /// Anchor claiming exactly this tag-set
    pub fn get_item(&self, tags: &TagSet) -> Option<&SchemaNode> {
        self.anchors.get(tags).map(|&idx| &self.nodes[idx])
    }

    /// Every anchor keyed by the tag-set it claims
    pub fn get_items(&self) -> impl Iterator<Item = (&TagSet, &SchemaNode)> {
        self.anchors.iter().map(|(tags, &idx)| (tags, &self.nodes[idx]))
    }

    /// Ancestors of a node ordered from the schema root down
    fn lineage(&self, idx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = Some(idx);
        while let Some(i) = current {
            chain.push(i);
            current = self.nodes[i].parent;
        }
        chain.reverse();
        chain
    }

    /// Reverse-resolves an rpath to the anchor yielding the most fields
    pub fn get_data_from_rpath(
        &self,
        formatter: &FieldFormatter,
        rpath: &str,
    ) -> Option<(TagSet, Fields)> {
        let mut best: Option<(TagSet, Fields)> = None;

        for (tags, node) in self.get_items() {
            let Some(fields) = formatter.parse(rpath, node.template()) else {
                continue;
            };

            let better = match &best {
                Some((_, current)) => fields.len() > current.len(),
                None => true,
            };
            if better {
                best = Some((tags.clone(), fields));
            }
        }

        best
    }

    /// Scaffolds the anchor for `tags` plus every node triggered by `tags`
    ///
    /// A node whose path can't be formatted or created is recorded in the
    /// report and skipped; remaining nodes are still built.
    pub fn build_structure(
        &self,
        accessor: &dyn Accessor,
        formatter: &FieldFormatter,
        tags: &TagSet,
        fields: &Fields,
    ) -> BuildReport {
        let mut report = BuildReport::default();

        if let Some(&anchor) = self.anchors.get(tags) {
            self.build_node(anchor, accessor, formatter, fields, &mut report);
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            if node.is_triggered(tags) {
                self.build_node(idx, accessor, formatter, fields, &mut report);
            }
        }

        report
    }

    fn build_node(
        &self,
        idx: usize,
        accessor: &dyn Accessor,
        formatter: &FieldFormatter,
        fields: &Fields,
        report: &mut BuildReport,
    ) {
        let node = &self.nodes[idx];

        let target = match formatter.format(node.template(), fields) {
            Ok(target) => target,
            Err(e) => return report.fail(node, e.to_string()),
        };

        match accessor.exists(&target) {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => return report.fail(node, e.to_string()),
        }

        let dir_leaf = match node.kind {
            NodeKind::Dir => Some(idx),
            _ => node.parent,
        };

        for dir in dir_leaf.map(|leaf| self.lineage(leaf)).unwrap_or_default() {
            let dir_node = &self.nodes[dir];
            let dir_path = match formatter.format(dir_node.template(), fields) {
                Ok(path) => path,
                Err(e) => return report.fail(node, e.to_string()),
            };

            match accessor.exists(&dir_path) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => return report.fail(node, e.to_string()),
            }

            if let Err(e) = accessor.make_dir(&dir_path, true) {
                return report.fail(node, format!("unable to build directory '{}': {}", dir_path, e));
            }
            debug!(path = %dir_path, "built directory");
            report.built.push(dir_path);
        }

        if node.kind == NodeKind::File {
            let seeded = fs::read(&node.path)
                .map_err(|e| e.to_string())
                .and_then(|content| accessor.write(&target, &content).map_err(|e| e.to_string()));

            match seeded {
                Ok(()) => {
                    debug!(path = %target, "seeded file");
                    report.built.push(target);
                }
                Err(reason) => report.fail(node, reason),
            }
        }
    }
}

fn read_config(path: &Path) -> Result<NodeConfig, SchemaError> {
    if !path.is_file() {
        return Ok(NodeConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| SchemaError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if content.trim().is_empty() {
        return Ok(NodeConfig::default());
    }

    serde_yaml::from_str(&content).map_err(|e| SchemaError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{tag_set, FieldConfig, FieldValue};
    use crate::storage::MemoryAccessor;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// project/
    ///   shots/ (format "{shot}" on the shot dir)
    ///     anchor__render.yml
    ///   assets/
    ///     anchor__model.yml
    ///   config/ (triggered by "render", propagate)
    ///     defaults.txt
    fn sample_schema() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("project/shots/shot")).unwrap();
        write(root, "project.yml", "format: '{project}'\n");
        write(root, "project/shots/shot.yml", "format: '{shot:04d}'\n");
        write(
            root,
            "project/shots/shot/anchor__render.yml",
            "tags: [render]\nformat: 'render_v{_version_:03d}.exr'\n",
        );
        fs::create_dir_all(root.join("project/assets")).unwrap();
        write(
            root,
            "project/assets/anchor__model.yml",
            "tags: [model, asset]\nformat: '{asset}.ma'\n",
        );
        write(
            root,
            "project/assets/anchor__texture.yml",
            "tags: [texture]\nformat: '{asset}_{texture}.ma'\n",
        );
        fs::create_dir_all(root.join("project/config")).unwrap();
        write(
            root,
            "project/config.yml",
            "triggers:\n  - tag_mask: render\n    propagate: true\n",
        );
        write(root, "project/config/defaults.txt", "fps=24\n");

        dir
    }

    fn formatter() -> FieldFormatter {
        FieldFormatter::new(FieldConfig::new()).unwrap()
    }

    fn fields(pairs: &[(&str, FieldValue)]) -> Fields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn load_builds_templates() {
        let dir = sample_schema();
        let tree = SchemaTree::load(dir.path()).unwrap();

        let render = tree.get_item(&tag_set(["render"])).unwrap();
        assert_eq!(
            render.template(),
            "{project}/shots/{shot}/render_v{_version_:03d}.exr"
        );

        let model = tree.get_item(&tag_set(["asset", "model"])).unwrap();
        assert_eq!(model.template(), "{project}/assets/{asset}.ma");
    }

    #[test]
    fn lookup_is_exact_set() {
        let dir = sample_schema();
        let tree = SchemaTree::load(dir.path()).unwrap();
        assert!(tree.get_item(&tag_set(["model"])).is_none());
        assert_eq!(tree.get_items().count(), 3);
    }

    #[test]
    fn missing_dir_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            SchemaTree::load(&dir.path().join("nope")),
            Err(SchemaError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_anchor_is_error() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/anchor__one.yml", "tags: [x]\nformat: one\n");
        write(dir.path(), "b/anchor__two.yml", "tags: [x]\nformat: two\n");
        assert!(matches!(
            SchemaTree::load(dir.path()),
            Err(SchemaError::DuplicateAnchor { .. })
        ));
    }

    #[test]
    fn triggers_propagate_to_children() {
        let dir = sample_schema();
        let tree = SchemaTree::load(dir.path()).unwrap();

        let seed = tree
            .nodes()
            .iter()
            .find(|n| n.path().ends_with("defaults.txt"))
            .unwrap();
        assert_eq!(seed.triggers().len(), 1);
        assert!(seed.is_triggered(&tag_set(["render"])));
        assert!(!seed.is_triggered(&tag_set(["model"])));
    }

    #[test]
    fn reverse_lookup_prefers_most_fields() {
        let dir = sample_schema();
        let tree = SchemaTree::load(dir.path()).unwrap();

        // both asset templates match, the texture one resolves more fields
        let (tags, parsed) = tree
            .get_data_from_rpath(&formatter(), "demo/assets/chair_wood.ma")
            .unwrap();
        assert_eq!(tags, tag_set(["texture"]));
        assert_eq!(parsed.len(), 3);

        let (tags, _) = tree
            .get_data_from_rpath(&formatter(), "demo/assets/chair.ma")
            .unwrap();
        assert_eq!(tags, tag_set(["asset", "model"]));

        assert!(tree
            .get_data_from_rpath(&formatter(), "demo/elsewhere/x")
            .is_none());
    }

    #[test]
    fn build_creates_dirs_and_triggered_seeds() {
        let dir = sample_schema();
        let tree = SchemaTree::load(dir.path()).unwrap();
        let accessor = MemoryAccessor::new();

        let report = tree.build_structure(
            &accessor,
            &formatter(),
            &tag_set(["render"]),
            &fields(&[
                ("project", "demo".into()),
                ("shot", "sh010".into()),
                ("_version_", 1.into()),
            ]),
        );

        assert!(report.is_complete(), "{:?}", report.failures);
        assert!(accessor.exists("demo/shots/sh010").unwrap());
        assert_eq!(
            accessor.read("demo/config/defaults.txt").unwrap(),
            Some(b"fps=24\n".to_vec())
        );
        assert!(!accessor.exists("demo/shots/sh010/render_v001.exr").unwrap());
    }

    #[test]
    fn build_is_idempotent() {
        let dir = sample_schema();
        let tree = SchemaTree::load(dir.path()).unwrap();
        let accessor = MemoryAccessor::new();
        let f = fields(&[
            ("project", "demo".into()),
            ("shot", "sh010".into()),
            ("_version_", 1.into()),
        ]);

        tree.build_structure(&accessor, &formatter(), &tag_set(["render"]), &f);
        accessor.write("demo/config/defaults.txt", b"edited").unwrap();
        let second = tree.build_structure(&accessor, &formatter(), &tag_set(["render"]), &f);

        assert!(second.built.is_empty());
        assert_eq!(
            accessor.read("demo/config/defaults.txt").unwrap(),
            Some(b"edited".to_vec())
        );
    }

    #[test]
    fn build_failure_is_reported_not_fatal() {
        let dir = sample_schema();
        let tree = SchemaTree::load(dir.path()).unwrap();
        let accessor = MemoryAccessor::new();

        // `shot` missing: the anchor fails, the triggered seed still builds
        let report = tree.build_structure(
            &accessor,
            &formatter(),
            &tag_set(["render"]),
            &fields(&[("project", "demo".into()), ("_version_", 1.into())]),
        );

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].reason.contains("shot"));
        assert!(accessor.exists("demo/config/defaults.txt").unwrap());
    }
}
