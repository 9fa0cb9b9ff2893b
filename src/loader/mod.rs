//! Module loader: maps dotted module names onto source files under a root
//! directory and expands packages into their submodules.
use crate::errors::{DiagramError, ParseError};
use crate::utils::file_walker;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A loaded model module.
#[derive(Debug, Clone)]
pub struct SourceModule {
    pub name: String,
    pub path: PathBuf,
    pub is_package: bool,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct ModuleLoader {
    root: PathBuf,
    respect_ignore: bool,
}

impl ModuleLoader {
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf(), respect_ignore: false }
    }

    /// Skip files matched by `.gitignore`/`.ignore` when listing package
    /// contents. Off by default: the interpreter imports them regardless.
    #[must_use]
    pub fn with_respect_ignore(mut self, respect_ignore: bool) -> Self {
        self.respect_ignore = respect_ignore;
        self
    }

    /// Load `roots` and every submodule of the packages among them.
    ///
    /// Work items are taken from the end of the queue, so siblings are
    /// visited in reverse listing order.
    ///
    /// # Errors
    /// Returns `DiagramError::ModuleNotFound` when a module has no source
    /// file, `DiagramError::Parse` when a source file is not UTF-8, and
    /// `DiagramError::Io` for other read failures.
    pub fn load_all(&self, roots: &[String]) -> Result<Vec<SourceModule>, DiagramError> {
        let mut to_load: Vec<(String, Option<String>)> =
            roots.iter().map(|r| (r.clone(), None)).collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut modules = Vec::new();

        while let Some((name, parent)) = to_load.pop() {
            let full = match parent {
                Some(p) => format!("{p}.{name}"),
                None => name,
            };
            if !seen.insert(full.clone()) {
                continue;
            }
            let module = self.load(&full)?;
            log::debug!("loaded module {} from {}", module.name, module.path.display());
            if module.is_package {
                let dir = module.path.parent().unwrap_or(&self.root);
                for sub in self.submodules(dir) {
                    to_load.push((sub, Some(module.name.clone())));
                }
            }
            modules.push(module);
        }
        Ok(modules)
    }

    /// Load a single module by its dotted name.
    ///
    /// # Errors
    /// See [`ModuleLoader::load_all`].
    pub fn load(&self, name: &str) -> Result<SourceModule, DiagramError> {
        let (path, is_package) = self.resolve(name).ok_or_else(|| DiagramError::ModuleNotFound {
            module: name.to_string(),
            root: self.root.clone(),
        })?;
        let bytes = fs::read(&path)?;
        let source = String::from_utf8(bytes).map_err(|_| DiagramError::Parse {
            module: name.to_string(),
            source: ParseError::InvalidUtf8 { file: path.clone() },
        })?;
        Ok(SourceModule { name: name.to_string(), path, is_package, source })
    }

    /// Load a module named by an import statement, if its source lives under
    /// the root. Packages are not expanded.
    ///
    /// # Errors
    /// See [`ModuleLoader::load`]; a name with no source file is `Ok(None)`.
    pub fn load_imported(&self, name: &str) -> Result<Option<SourceModule>, DiagramError> {
        if self.resolve(name).is_none() {
            return Ok(None);
        }
        self.load(name).map(Some)
    }

    /// Source file for `name`: `a/b/__init__.py` for a package, else `a/b.py`.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<(PathBuf, bool)> {
        let segments: Vec<&str> = name.split('.').collect();
        if segments.iter().any(|s| !is_identifier(s)) {
            return None;
        }
        let mut base = self.root.clone();
        for s in &segments {
            base.push(s);
        }
        let init = base.join("__init__.py");
        if init.is_file() {
            return Some((init, true));
        }
        let file = base.with_extension("py");
        file.is_file().then_some((file, false))
    }

    /// Direct submodule names of the package in `dir`, sorted.
    fn submodules(&self, dir: &Path) -> Vec<String> {
        let mut out: Vec<String> = file_walker::package_entries(dir, self.respect_ignore)
            .into_iter()
            .filter_map(|entry| {
                if entry.is_dir() {
                    let name = entry.file_name()?.to_str()?;
                    return (is_identifier(name) && entry.join("__init__.py").is_file())
                        .then(|| name.to_string());
                }
                if entry.extension().and_then(|e| e.to_str()) != Some("py") {
                    return None;
                }
                let stem = entry.file_stem()?.to_str()?;
                (stem != "__init__" && is_identifier(stem)).then(|| stem.to_string())
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
