use std::collections::{HashMap, HashSet};

use crate::parser::{ClassDef, ImportDecl, ParsedModule};

// Re-export chains deeper than this are treated as unresolvable.
const MAX_DEPTH: usize = 16;

/// Document base classes supplied by the modeling framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkBase {
    Document,
    DynamicDocument,
    EmbeddedDocument,
    DynamicEmbeddedDocument,
}

impl FrameworkBase {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Document" => Some(Self::Document),
            "DynamicDocument" => Some(Self::DynamicDocument),
            "EmbeddedDocument" => Some(Self::EmbeddedDocument),
            "DynamicEmbeddedDocument" => Some(Self::DynamicEmbeddedDocument),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_embedded(self) -> bool {
        matches!(self, Self::EmbeddedDocument | Self::DynamicEmbeddedDocument)
    }
}

/// What a name used in a module refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Framework(FrameworkBase),
    /// Fully-qualified name of a parsed class.
    Class(String),
    /// Anything else: builtins, third-party types, unknown names.
    External,
}

/// Name resolution across every parsed module.
///
/// Mirrors Python's lookup closely enough for model files: enclosing class
/// body, module-level classes, `from`/`import` bindings (including relative
/// and star imports), and re-exports through loaded packages.
pub struct Resolver<'a> {
    modules: HashMap<&'a str, &'a ParsedModule>,
    // fq name -> class definition
    classes: HashMap<String, &'a ClassDef>,
    // simple class name -> fq names, in load order (the framework's document registry)
    registry: HashMap<&'a str, Vec<String>>,
    framework_prefix: &'a str,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(modules: &'a [ParsedModule], framework_prefix: &'a str) -> Self {
        let mut by_name: HashMap<&'a str, &'a ParsedModule> = HashMap::with_capacity(modules.len());
        let mut classes: HashMap<String, &'a ClassDef> = HashMap::new();
        let mut registry: HashMap<&'a str, Vec<String>> = HashMap::new();
        for module in modules {
            by_name.insert(module.name.as_str(), module);
            for class in &module.classes {
                let fq = format!("{}.{}", module.name, class.qualname);
                registry.entry(class.name.as_str()).or_default().push(fq.clone());
                classes.insert(fq, class);
            }
        }
        Self { modules: by_name, classes, registry, framework_prefix }
    }

    #[must_use]
    pub fn is_framework_module(&self, name: &str) -> bool {
        !self.framework_prefix.is_empty() && name.starts_with(self.framework_prefix)
    }

    #[must_use]
    pub fn class(&self, fq: &str) -> Option<&'a ClassDef> {
        self.classes.get(fq).copied()
    }

    /// Resolve a (possibly dotted) name as written inside `module`, optionally
    /// from within the body of the top-level class `outer`.
    #[must_use]
    pub fn resolve(&self, module: &ParsedModule, outer: Option<&str>, expr: &str) -> Resolved {
        let segs: Vec<&str> = expr.split('.').map(str::trim).filter(|s| !s.is_empty()).collect();
        if segs.is_empty() {
            return Resolved::External;
        }
        if let Some(outer) = outer {
            let fq = format!("{}.{}.{}", module.name, outer, segs.join("."));
            if self.classes.contains_key(&fq) {
                return Resolved::Class(fq);
            }
        }
        self.resolve_in(&module.name, &segs, 0, &mut HashSet::new())
    }

    /// Resolve a string-literal target the way the framework's document
    /// registry does: `'self'`, then a fully-qualified name, then the simple
    /// class name.
    #[must_use]
    pub fn resolve_literal(&self, owner: &str, literal: &str) -> Option<String> {
        let literal = literal.trim();
        if literal == "self" {
            return Some(owner.to_string());
        }
        if self.classes.contains_key(literal) {
            return Some(literal.to_string());
        }
        let simple = literal.rsplit('.').next().unwrap_or(literal);
        let candidates = self.registry.get(simple)?;
        if candidates.len() > 1 {
            log::debug!("'{literal}' matches {} classes; using {}", candidates.len(), candidates[0]);
        }
        candidates.first().cloned()
    }

    // `seen` holds every (module, name) pair tried during one lookup. A hit
    // always returns straight to the caller, so a repeated pair can only fail
    // again; cutting it keeps cyclic star imports linear.
    fn resolve_in(
        &self,
        module_name: &str,
        segs: &[&str],
        depth: usize,
        seen: &mut HashSet<(String, Vec<String>)>,
    ) -> Resolved {
        if depth > MAX_DEPTH || segs.is_empty() {
            return Resolved::External;
        }
        let visit = (module_name.to_string(), segs.iter().map(|s| (*s).to_string()).collect());
        if !seen.insert(visit) {
            return Resolved::External;
        }
        if self.is_framework_module(module_name) && !self.modules.contains_key(module_name) {
            return match segs {
                [name] => FrameworkBase::from_name(name).map_or(Resolved::External, Resolved::Framework),
                _ => Resolved::External,
            };
        }
        let Some(module) = self.modules.get(module_name).copied() else {
            let fq = format!("{module_name}.{}", segs.join("."));
            return if self.classes.contains_key(&fq) {
                Resolved::Class(fq)
            } else {
                Resolved::External
            };
        };

        let first = segs[0];
        let local = format!("{module_name}.{first}");
        if self.classes.contains_key(&local) {
            return match segs {
                [_] => Resolved::Class(local),
                [_, nested] => {
                    let fq = format!("{local}.{nested}");
                    if self.classes.contains_key(&fq) {
                        Resolved::Class(fq)
                    } else {
                        Resolved::External
                    }
                }
                _ => Resolved::External,
            };
        }

        // Later imports shadow earlier ones.
        for import in module.imports.iter().rev() {
            match import {
                ImportDecl::From { module: src, name, alias } => {
                    if alias.as_deref().unwrap_or(name) != first {
                        continue;
                    }
                    let src = module.absolute_module(src);
                    let submodule = format!("{src}.{name}");
                    if self.modules.contains_key(submodule.as_str()) {
                        return self.resolve_in(&submodule, &segs[1..], depth + 1, seen);
                    }
                    let mut rest = vec![name.as_str()];
                    rest.extend_from_slice(&segs[1..]);
                    return self.resolve_in(&src, &rest, depth + 1, seen);
                }
                ImportDecl::Module { path, alias: Some(alias) } => {
                    if alias == first {
                        return self.resolve_in(path, &segs[1..], depth + 1, seen);
                    }
                }
                ImportDecl::Module { path, alias: None } => {
                    // `import a.b` binds `a`; pick the longest loaded module prefix.
                    if path.split('.').next() != Some(first) {
                        continue;
                    }
                    for k in (1..segs.len()).rev() {
                        let candidate = segs[..k].join(".");
                        if self.modules.contains_key(candidate.as_str())
                            || self.is_framework_module(&candidate)
                        {
                            return self.resolve_in(&candidate, &segs[k..], depth + 1, seen);
                        }
                    }
                }
                ImportDecl::Glob { module: src } => {
                    let src = module.absolute_module(src);
                    let found = self.resolve_in(&src, segs, depth + 1, seen);
                    if found != Resolved::External {
                        return found;
                    }
                }
            }
        }

        if segs.len() > 1 {
            let submodule = format!("{module_name}.{first}");
            if self.modules.contains_key(submodule.as_str()) {
                return self.resolve_in(&submodule, &segs[1..], depth + 1, seen);
            }
        }

        // Model files routinely use the framework bases without a visible
        // import (star imports through helper modules), so accept them bare.
        match segs {
            [name] => FrameworkBase::from_name(name).map_or(Resolved::External, Resolved::Framework),
            _ => Resolved::External,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ModelParser;

    fn module(name: &str, is_package: bool, src: &str) -> ParsedModule {
        ModelParser::new().parse_module(src, name, is_package)
    }

    #[test]
    fn test_framework_bases_through_imports() {
        let mods = vec![module(
            "model.a",
            false,
            "import mongoengine as me\nfrom mongoengine.document import EmbeddedDocument as ED\n",
        )];
        let r = Resolver::new(&mods, "mongoengine");
        let m = &mods[0];
        assert_eq!(r.resolve(m, None, "me.Document"), Resolved::Framework(FrameworkBase::Document));
        assert_eq!(
            r.resolve(m, None, "ED"),
            Resolved::Framework(FrameworkBase::EmbeddedDocument)
        );
        assert_eq!(r.resolve(m, None, "me.StringField"), Resolved::External);
        assert_eq!(r.resolve(m, None, "object"), Resolved::External);
    }

    #[test]
    fn test_reexport_through_package_and_dotted_module_access() {
        let mods = vec![
            module("model", true, "from .patient import Patient\n"),
            module("model.patient", false, "class Patient(Document):\n    pass\n"),
            module(
                "model.visit",
                false,
                "from model import Patient\nimport model.patient\nfrom . import patient as pmod\n",
            ),
        ];
        let r = Resolver::new(&mods, "mongoengine");
        let visit = &mods[2];
        let expected = Resolved::Class("model.patient.Patient".into());
        assert_eq!(r.resolve(visit, None, "Patient"), expected);
        assert_eq!(r.resolve(visit, None, "model.patient.Patient"), expected);
        assert_eq!(r.resolve(visit, None, "pmod.Patient"), expected);
        assert_eq!(r.resolve(visit, None, "Unknown"), Resolved::External);
    }

    #[test]
    fn test_literal_registry_lookup() {
        let mods = vec![
            module("model.a", false, "class User(Document):\n    pass\n"),
            module("model.legacy", false, "class User(Document):\n    pass\n"),
        ];
        let r = Resolver::new(&mods, "mongoengine");
        assert_eq!(r.resolve_literal("model.a.User", "self").as_deref(), Some("model.a.User"));
        assert_eq!(r.resolve_literal("x", "model.legacy.User").as_deref(), Some("model.legacy.User"));
        assert_eq!(r.resolve_literal("x", "User").as_deref(), Some("model.a.User"));
        assert_eq!(r.resolve_literal("x", "Missing"), None);
    }

    // Package `__init__` star-imports every submodule and every submodule
    // star-imports the package back.
    fn cyclic_star_package(n: usize) -> Vec<ParsedModule> {
        let init: String = (0..n).map(|i| format!("from .m{i} import *\n")).collect();
        let mut mods = vec![module("model", true, &init)];
        for i in 0..n {
            let src = format!(
                "from mongoengine import *\nfrom model import *\n\nclass Mixin{i}(object):\n    pass\n\nclass D{i}(Mixin{i}, Document):\n    ref = ReferenceField(Nowhere)\n"
            );
            mods.push(module(&format!("model.m{i}"), false, &src));
        }
        mods
    }

    #[test]
    fn test_cyclic_star_imports_resolve_without_blowup() {
        let mods = cyclic_star_package(14);
        let r = Resolver::new(&mods, "mongoengine");
        let m0 = &mods[1];
        assert_eq!(r.resolve(m0, None, "object"), Resolved::External);
        assert_eq!(r.resolve(m0, None, "Nowhere"), Resolved::External);
        assert_eq!(r.resolve(m0, None, "D13"), Resolved::Class("model.m13.D13".into()));
        assert_eq!(r.resolve(m0, None, "Document"), Resolved::Framework(FrameworkBase::Document));
    }
}
