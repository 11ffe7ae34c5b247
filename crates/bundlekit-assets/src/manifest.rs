//! The dependency manifest - which bundles each bundle needs resident first.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bundlekit_core::alloc::HashMap;

use crate::error::InitError;

/// Where to read the dependency manifest from during initialization.
#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// A JSON object mapping each bundle name to its dependency names.
    Json(String),
    /// A file containing the JSON form.
    File(PathBuf),
    /// Entries supplied directly by the host.
    Entries(Vec<(String, Vec<String>)>),
}

impl ManifestSource {
    /// Read and validate the manifest.
    pub async fn load(self) -> Result<DependencyManifest, InitError> {
        match self {
            ManifestSource::Json(text) => DependencyManifest::from_json_str(&text),
            ManifestSource::File(path) => DependencyManifest::from_file(path).await,
            ManifestSource::Entries(entries) => DependencyManifest::from_entries(entries),
        }
    }
}

impl From<Vec<(String, Vec<String>)>> for ManifestSource {
    fn from(entries: Vec<(String, Vec<String>)>) -> Self {
        ManifestSource::Entries(entries)
    }
}

/// Read-only mapping from a bundle name to its direct dependencies.
///
/// Construction rejects dependency cycles, so walking the graph from any
/// bundle always terminates.
///
/// # Example
///
/// ```
/// use bundlekit_assets::DependencyManifest;
///
/// let manifest = DependencyManifest::from_json_str(
///     r#"{ "ui/login.b": ["ui/common.b"], "ui/common.b": [] }"#,
/// ).unwrap();
///
/// assert_eq!(manifest.dependencies("ui/login.b"), ["ui/common.b".to_string()]);
/// assert!(manifest.dependencies("unknown.b").is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DependencyManifest {
    dependencies: HashMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyManifest {
    /// A manifest where no bundle has dependencies.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a manifest from `(bundle, dependencies)` pairs.
    ///
    /// Repeated dependency names keep their first position. Repeated bundle
    /// entries are merged.
    pub fn from_entries<I, N, D>(entries: I) -> Result<Self, InitError>
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        for (name, deps) in entries {
            let list = dependencies.entry(name.into()).or_default();
            for dep in deps {
                let dep = dep.into();
                if !list.contains(&dep) {
                    list.push(dep);
                }
            }
        }

        let manifest = Self { dependencies };
        if let Some(cycle) = manifest.find_cycle() {
            return Err(InitError::DependencyCycle { cycle });
        }

        tracing::debug!(bundles = manifest.len(), "dependency manifest loaded");
        Ok(manifest)
    }

    /// Parse the JSON form: `{ "bundle": ["dependency", ...], ... }`.
    pub fn from_json_str(text: &str) -> Result<Self, InitError> {
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(text)?;
        Self::from_entries(raw)
    }

    /// Read the JSON form from a file.
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self, InitError> {
        let path = path.into();
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| InitError::ManifestIo {
                path: path.clone(),
                source,
            })?;
        Self::from_json_str(&text)
    }

    /// Direct dependencies of `bundle`, in declaration order.
    ///
    /// A bundle missing from the manifest has no dependencies.
    pub fn dependencies(&self, bundle: &str) -> &[String] {
        self.dependencies
            .get(bundle)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Check if the manifest has an entry for `bundle`.
    pub fn contains(&self, bundle: &str) -> bool {
        self.dependencies.contains_key(bundle)
    }

    /// Iterate over every bundle with a manifest entry.
    pub fn bundle_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    /// Number of bundles with a manifest entry.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Check if the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = HashMap::new();
        let mut path = Vec::new();

        // Sorted so the reported cycle is stable across runs.
        let mut names: Vec<&str> = self.bundle_names().collect();
        names.sort_unstable();

        names
            .into_iter()
            .find_map(|name| self.visit(name, &mut marks, &mut path))
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(name, Mark::Visiting);
        path.push(name);
        for dep in self.dependencies(name) {
            if let Some(cycle) = self.visit(dep, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(name, Mark::Done);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bundle_has_no_dependencies() {
        let manifest = DependencyManifest::empty();
        assert!(manifest.dependencies("anything.b").is_empty());
        assert!(!manifest.contains("anything.b"));
    }

    #[test]
    fn test_dependency_order_preserved_and_deduplicated() {
        let manifest =
            DependencyManifest::from_entries([("a", vec!["c", "b", "c"]), ("b", vec![])]).unwrap();
        assert_eq!(manifest.dependencies("a"), ["c".to_string(), "b".to_string()]);
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_undeclared_dependency_is_a_leaf() {
        let manifest = DependencyManifest::from_entries([("a", vec!["shared.b"])]).unwrap();
        assert!(manifest.dependencies("shared.b").is_empty());
    }

    #[test]
    fn test_cycle_rejected() {
        let result =
            DependencyManifest::from_entries([
                ("a", vec!["b"]),
                ("b", vec!["c"]),
                ("c", vec!["a"]),
            ]);
        match result {
            Err(InitError::DependencyCycle { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let result = DependencyManifest::from_entries([("a", vec!["a"])]);
        assert!(matches!(result, Err(InitError::DependencyCycle { .. })));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let manifest = DependencyManifest::from_entries([
            ("top", vec!["left", "right"]),
            ("left", vec!["base"]),
            ("right", vec!["base"]),
        ]);
        assert!(manifest.is_ok());
    }

    #[test]
    fn test_json_parse_error() {
        let result = DependencyManifest::from_json_str(r#"{ "a": "not-a-list" }"#);
        assert!(matches!(result, Err(InitError::Parse(_))));
    }

    #[tokio::test]
    async fn test_missing_manifest_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ManifestSource::File(dir.path().join("missing.json")).load().await;
        assert!(matches!(result, Err(InitError::ManifestIo { .. })));
    }

    #[tokio::test]
    async fn test_manifest_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, r#"{ "scenes/ui.b": ["ui/common.b"] }"#).unwrap();

        let manifest = ManifestSource::File(path).load().await.unwrap();
        assert_eq!(manifest.dependencies("scenes/ui.b"), ["ui/common.b".to_string()]);
    }
}
