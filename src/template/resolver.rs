//! Template name resolution

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::error::RenderError;

/// Source of template text
pub trait Loader: Send + Sync {
    /// Whether a template exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Read the template at `path`
    fn load(&self, path: &Path) -> io::Result<String>;
}

/// Loads templates from the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl Loader for FileLoader {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn load(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Loads templates from an in-memory map of path to source
#[derive(Debug, Default)]
pub struct MemoryLoader {
    sources: RwLock<HashMap<PathBuf, String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template, builder style
    pub fn with_template(self, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    /// Add or replace a template
    pub fn insert(&self, path: impl Into<PathBuf>, source: impl Into<String>) {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), source.into());
    }
}

impl Loader for MemoryLoader {
    fn exists(&self, path: &Path) -> bool {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    fn load(&self, path: &Path) -> io::Result<String> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no template at {}", path.display()),
                )
            })
    }
}

/// Maps template names to concrete locations
///
/// A name is tried against the default search paths followed by any extra
/// paths given for the lookup. The `namespace:name` form searches only the
/// paths registered for that namespace. A name that matches no search path
/// is finally tried as a location on its own.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    paths: Vec<PathBuf>,
    namespaces: HashMap<String, Vec<PathBuf>>,
}

impl Resolver {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            namespaces: HashMap::new(),
        }
    }

    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Register (or replace) the search paths of a namespace
    pub fn add_namespace(&mut self, namespace: impl Into<String>, paths: Vec<PathBuf>) {
        self.namespaces.insert(namespace.into(), paths);
    }

    /// Resolve `name` to a location that `loader` can read
    pub fn resolve(
        &self,
        name: &str,
        extra: &[PathBuf],
        loader: &dyn Loader,
    ) -> Result<PathBuf, RenderError> {
        let (name, search): (&str, Vec<&PathBuf>) = match self.split_namespace(name) {
            Some((local, paths)) => (local, paths.iter().collect()),
            None => (name, self.paths.iter().chain(extra).collect()),
        };

        if let Some(found) = search
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|candidate| loader.exists(candidate))
        {
            return Ok(found);
        }

        let bare = PathBuf::from(name);
        if loader.exists(&bare) {
            return Ok(bare);
        }

        Err(RenderError::TemplateNotFound {
            name: name.to_string(),
            from: None,
        })
    }

    fn split_namespace<'n>(&self, name: &'n str) -> Option<(&'n str, &Vec<PathBuf>)> {
        let mut parts = name.split(':');
        let (ns, local) = (parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        self.namespaces.get(ns).map(|paths| (local, paths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> MemoryLoader {
        MemoryLoader::new()
            .with_template("views/page", "page")
            .with_template("shared/page", "shared page")
            .with_template("admin/page", "admin page")
            .with_template("loose", "loose")
    }

    #[test]
    fn test_default_paths_first() {
        let resolver = Resolver::new(vec!["views".into()]);
        let found = resolver
            .resolve("page", &[PathBuf::from("shared")], &loader())
            .unwrap();
        assert_eq!(found, PathBuf::from("views/page"));
    }

    #[test]
    fn test_extra_paths_searched() {
        let resolver = Resolver::new(vec![]);
        let found = resolver
            .resolve("page", &[PathBuf::from("shared")], &loader())
            .unwrap();
        assert_eq!(found, PathBuf::from("shared/page"));
    }

    #[test]
    fn test_namespace_replaces_search_paths() {
        let mut resolver = Resolver::new(vec!["views".into()]);
        resolver.add_namespace("admin", vec!["admin".into()]);
        let found = resolver.resolve("admin:page", &[], &loader()).unwrap();
        assert_eq!(found, PathBuf::from("admin/page"));
    }

    #[test]
    fn test_unknown_namespace_is_literal_name() {
        let resolver = Resolver::new(vec!["views".into()]);
        let err = resolver.resolve("nope:page", &[], &loader()).unwrap_err();
        assert!(matches!(err, RenderError::TemplateNotFound { .. }));
    }

    #[test]
    fn test_bare_location_fallback() {
        let resolver = Resolver::new(vec!["views".into()]);
        let found = resolver.resolve("loose", &[], &loader()).unwrap();
        assert_eq!(found, PathBuf::from("loose"));
    }

    #[test]
    fn test_not_found() {
        let resolver = Resolver::new(vec!["views".into()]);
        let err = resolver.resolve("missing", &[], &loader()).unwrap_err();
        assert_eq!(err.to_string(), "template not found: 'missing'");
    }
}
