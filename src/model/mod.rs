//! Document model discovered from parsed modules.
//!
//! `DocumentModel::discover` is the class discoverer and field extractor: it
//! keeps every parsed class that derives (directly or transitively) from one
//! of the framework's document bases, skips framework modules, and resolves
//! each declared field's target to a fully-qualified class name.
use crate::parser::{ClassDef, ImportDecl, ParsedModule, TypeExpr};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub mod resolver;

use resolver::{FrameworkBase, Resolved, Resolver};

/// Semantic kind of a persisted field, generic over how a target class is
/// named (`TypeExpr` straight from source, `Target` once resolved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind<T> {
    Scalar { type_name: String },
    Identifier,
    Reference { target: T },
    Embedded { target: T },
    Repeated { inner: Option<Box<FieldKind<T>>> },
}

impl<T> FieldKind<T> {
    /// Rewrite every target in this kind, recursing through repeated fields.
    pub fn map_target<U>(self, f: &mut impl FnMut(T) -> U) -> FieldKind<U> {
        match self {
            FieldKind::Scalar { type_name } => FieldKind::Scalar { type_name },
            FieldKind::Identifier => FieldKind::Identifier,
            FieldKind::Reference { target } => FieldKind::Reference { target: f(target) },
            FieldKind::Embedded { target } => FieldKind::Embedded { target: f(target) },
            FieldKind::Repeated { inner } => {
                FieldKind::Repeated { inner: inner.map(|k| Box::new(k.map_target(f))) }
            }
        }
    }
}

/// Resolved target of a reference or embedded field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Fully-qualified name of a parsed class.
    Class(String),
    /// Target as written in source; it names no parsed class.
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind<Target>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentClass {
    /// Fully-qualified name: `<module>.<qualname>`.
    pub key: String,
    pub module: String,
    /// Class path inside its module (`Outer.Inner` for nested classes).
    pub qualname: String,
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    /// Fully-qualified names of the immediate bases that are parsed classes.
    pub bases: Vec<String>,
    pub embedded: bool,
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
}

impl DocumentClass {
    /// Sorted, de-duplicated field names as shown in the node label.
    #[must_use]
    pub fn sorted_field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentModel {
    pub classes: Vec<DocumentClass>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

/// Per-class facts computed once before discovery.
struct ClassFacts {
    bases: Vec<Resolved>,
}

impl DocumentModel {
    /// Discover document classes across `modules`, in load order and
    /// declaration order. Classes defined in modules whose dotted name starts
    /// with `framework_prefix` are never reported.
    #[must_use]
    pub fn discover(modules: &[ParsedModule], framework_prefix: &str) -> Self {
        Self::discover_with_imports(modules, modules.len(), framework_prefix)
    }

    /// Like [`DocumentModel::discover`], where only the first `scanned`
    /// modules were requested and the rest were loaded because something
    /// imports from them. A class of an imported-only module is reported
    /// after the classes of the first scanned module that binds it with
    /// `from X import Y` or `from X import *`.
    #[must_use]
    pub fn discover_with_imports(
        modules: &[ParsedModule],
        scanned: usize,
        framework_prefix: &str,
    ) -> Self {
        let resolver = Resolver::new(modules, framework_prefix);
        let scanned = scanned.min(modules.len());

        let mut facts: HashMap<String, ClassFacts> = HashMap::new();
        for module in modules {
            for class in &module.classes {
                let bases = class
                    .bases
                    .iter()
                    .map(|b| resolver.resolve(module, class.outer.as_deref(), b))
                    .collect();
                facts.insert(fq_name(module, class), ClassFacts { bases });
            }
        }
        let imported: HashMap<&str, &ParsedModule> = modules[scanned..]
            .iter()
            .filter(|m| !resolver.is_framework_module(&m.name))
            .map(|m| (m.name.as_str(), m))
            .collect();

        let mut roots: HashMap<String, Option<FrameworkBase>> = HashMap::new();
        let mut model = DocumentModel::default();
        for module in &modules[..scanned] {
            if resolver.is_framework_module(&module.name) {
                log::debug!("skipping framework module {}", module.name);
                continue;
            }
            let mut candidates: Vec<(&ParsedModule, &ClassDef)> =
                module.classes.iter().map(|c| (module, c)).collect();
            candidates.extend(imported_classes(&resolver, module, &imported));
            for (owner, class) in candidates {
                let key = fq_name(owner, class);
                if owner.name != module.name && model.contains(&key) {
                    continue;
                }
                let Some(root) = document_root(&key, &facts, &mut roots, &mut HashSet::new())
                else {
                    continue;
                };
                log::debug!("document {key} declared on line {}", class.line);
                let document = build_class(&resolver, &facts, owner, class, key, root);
                model.insert(document);
            }
        }
        model.assign_implicit_ids(&resolver, &facts, &roots);
        log::debug!("discovered {} document classes", model.classes.len());
        model
    }

    fn insert(&mut self, class: DocumentClass) {
        if let Some(&idx) = self.index.get(&class.key) {
            self.classes[idx] = class;
        } else {
            self.index.insert(class.key.clone(), self.classes.len());
            self.classes.push(class);
        }
    }

    /// Top-level concrete documents get the framework's implicit `id`
    /// identifier, unless an ancestor already supplies one.
    fn assign_implicit_ids(
        &mut self,
        resolver: &Resolver<'_>,
        facts: &HashMap<String, ClassFacts>,
        roots: &HashMap<String, Option<FrameworkBase>>,
    ) {
        let mut memo: HashMap<String, bool> = HashMap::new();
        for class in &mut self.classes {
            if class.embedded || class.field("id").is_some() {
                continue;
            }
            if owns_id(&class.key, resolver, facts, roots, &mut memo, 0) {
                class.fields.insert(
                    0,
                    FieldDescriptor { name: "id".to_string(), kind: FieldKind::Identifier },
                );
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&DocumentClass> {
        self.index.get(key).map(|&i| &self.classes[i])
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentClass> {
        self.classes.iter()
    }
}

/// Classes of imported-only modules that `module` binds by name, with the
/// classes nested one level inside them.
fn imported_classes<'m>(
    resolver: &Resolver<'_>,
    module: &ParsedModule,
    imported: &HashMap<&str, &'m ParsedModule>,
) -> Vec<(&'m ParsedModule, &'m ClassDef)> {
    let mut out: Vec<(&'m ParsedModule, &'m ClassDef)> = Vec::new();
    for import in &module.imports {
        match import {
            ImportDecl::From { name, alias, .. } => {
                let bound = alias.as_deref().unwrap_or(name);
                let Resolved::Class(fq) = resolver.resolve(module, None, bound) else {
                    continue;
                };
                for &owner in imported.values() {
                    let Some(qualname) =
                        fq.strip_prefix(owner.name.as_str()).and_then(|r| r.strip_prefix('.'))
                    else {
                        continue;
                    };
                    out.extend(
                        owner
                            .classes
                            .iter()
                            .filter(|c| c.qualname == qualname || c.outer.as_deref() == Some(qualname))
                            .map(|c| (owner, c)),
                    );
                }
            }
            ImportDecl::Glob { module: src } => {
                if let Some(&owner) = imported.get(module.absolute_module(src).as_str()) {
                    out.extend(
                        owner.classes.iter().filter(|c| !c.name.starts_with('_')).map(|c| (owner, c)),
                    );
                }
            }
            ImportDecl::Module { .. } => {}
        }
    }
    out
}

fn fq_name(module: &ParsedModule, class: &ClassDef) -> String {
    format!("{}.{}", module.name, class.qualname)
}

/// The framework base a class ultimately derives from, if any.
fn document_root(
    key: &str,
    facts: &HashMap<String, ClassFacts>,
    memo: &mut HashMap<String, Option<FrameworkBase>>,
    visiting: &mut HashSet<String>,
) -> Option<FrameworkBase> {
    if let Some(root) = memo.get(key) {
        return *root;
    }
    if !visiting.insert(key.to_string()) {
        return None;
    }
    let mut root = None;
    if let Some(f) = facts.get(key) {
        for base in &f.bases {
            root = match base {
                Resolved::Framework(b) => Some(*b),
                Resolved::Class(fq) => document_root(fq, facts, memo, visiting),
                Resolved::External => None,
            };
            if root.is_some() {
                break;
            }
        }
    }
    visiting.remove(key);
    memo.insert(key.to_string(), root);
    root
}

fn build_class(
    resolver: &Resolver<'_>,
    facts: &HashMap<String, ClassFacts>,
    module: &ParsedModule,
    class: &ClassDef,
    key: String,
    root: FrameworkBase,
) -> DocumentClass {
    let bases = facts
        .get(&key)
        .map(|f| {
            f.bases
                .iter()
                .filter_map(|b| match b {
                    Resolved::Class(fq) => Some(fq.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let fields = class
        .fields
        .iter()
        .map(|decl| {
            let kind = decl.kind.clone().map_target(&mut |expr| match expr {
                TypeExpr::Name(name) => {
                    match resolver.resolve(module, class.outer.as_deref(), &name) {
                        Resolved::Class(fq) => Target::Class(fq),
                        _ => Target::Unresolved(name),
                    }
                }
                TypeExpr::Literal(lit) => resolver
                    .resolve_literal(&key, &lit)
                    .map_or(Target::Unresolved(lit), Target::Class),
                TypeExpr::Missing => Target::Unresolved(String::new()),
            });
            FieldDescriptor { name: decl.name.clone(), kind }
        })
        .collect();
    DocumentClass {
        key,
        module: module.name.clone(),
        qualname: class.qualname.clone(),
        name: class.name.clone(),
        fields,
        bases,
        embedded: root.is_embedded(),
        is_abstract: class.is_abstract,
    }
}

/// Whether the class at `key` declares the implicit `id` itself.
fn owns_id(
    key: &str,
    resolver: &Resolver<'_>,
    facts: &HashMap<String, ClassFacts>,
    roots: &HashMap<String, Option<FrameworkBase>>,
    memo: &mut HashMap<String, bool>,
    depth: usize,
) -> bool {
    if let Some(&v) = memo.get(key) {
        return v;
    }
    if depth > 32 {
        return false;
    }
    let Some(class) = resolver.class(key) else {
        return false;
    };
    let top_level = matches!(roots.get(key), Some(Some(root)) if !root.is_embedded());
    let declares_key = class.fields.iter().any(|f| f.primary_key || f.name == "id");
    let bases: Vec<String> = facts
        .get(key)
        .map(|f| {
            f.bases
                .iter()
                .filter_map(|b| match b {
                    Resolved::Class(fq) => Some(fq.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let inherited =
        bases.iter().any(|b| has_id(b, resolver, facts, roots, memo, depth + 1));
    let owns = top_level && !class.is_abstract && !declares_key && !inherited;
    memo.insert(key.to_string(), owns);
    owns
}

/// Whether the class at `key` or any ancestor supplies an identifier.
fn has_id(
    key: &str,
    resolver: &Resolver<'_>,
    facts: &HashMap<String, ClassFacts>,
    roots: &HashMap<String, Option<FrameworkBase>>,
    memo: &mut HashMap<String, bool>,
    depth: usize,
) -> bool {
    if depth > 32 {
        return false;
    }
    let Some(class) = resolver.class(key) else {
        return false;
    };
    if class.fields.iter().any(|f| f.primary_key || f.name == "id")
        || owns_id(key, resolver, facts, roots, memo, depth)
    {
        return true;
    }
    facts.get(key).is_some_and(|f| {
        f.bases.iter().any(|b| match b {
            Resolved::Class(fq) => has_id(fq, resolver, facts, roots, memo, depth + 1),
            _ => false,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ModelParser;

    fn modules(sources: &[(&str, &str)]) -> Vec<ParsedModule> {
        let parser = ModelParser::new();
        sources
            .iter()
            .map(|(name, src)| parser.parse_module(src, name, false))
            .collect()
    }

    #[test]
    fn test_discovers_documents_and_skips_plain_classes() {
        let mods = modules(&[(
            "model.people",
            r#"
from mongoengine import Document, EmbeddedDocument, StringField

class Helper(object):
    pass

class Address(EmbeddedDocument):
    street = StringField()

class Person(Document):
    name = StringField()
"#,
        )]);
        let model = DocumentModel::discover(&mods, "mongoengine");
        let keys: Vec<_> = model.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["model.people.Address", "model.people.Person"]);
        let address = model.get("model.people.Address").unwrap();
        assert!(address.embedded);
        assert_eq!(address.sorted_field_names(), vec!["street"]);
        let person = model.get("model.people.Person").unwrap();
        assert_eq!(person.sorted_field_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_transitive_subclass_across_modules_keeps_own_fields() {
        let mods = modules(&[
            (
                "model.base",
                "from mongoengine import *\n\nclass Animal(Document):\n    meta = {'allow_inheritance': True}\n    name = StringField()\n",
            ),
            (
                "model.dogs",
                "from model.base import Animal\n\nclass Dog(Animal):\n    breed = StringField()\n",
            ),
        ]);
        let model = DocumentModel::discover(&mods, "mongoengine");
        let dog = model.get("model.dogs.Dog").expect("subclass discovered");
        assert_eq!(dog.bases, vec!["model.base.Animal".to_string()]);
        // inherited fields and the inherited id stay on the base node
        assert_eq!(dog.sorted_field_names(), vec!["breed"]);
        let animal = model.get("model.base.Animal").unwrap();
        assert_eq!(animal.sorted_field_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_abstract_base_pushes_id_to_concrete_subclass() {
        let mods = modules(&[(
            "model.audit",
            r#"
class Stamped(Document):
    meta = {'abstract': True}
    created = DateTimeField()

class Entry(Stamped):
    text = StringField()

class Keyed(Document):
    code = StringField(primary_key=True)
"#,
        )]);
        let model = DocumentModel::discover(&mods, "mongoengine");
        assert_eq!(model.get("model.audit.Stamped").unwrap().sorted_field_names(), vec!["created"]);
        assert_eq!(model.get("model.audit.Entry").unwrap().sorted_field_names(), vec!["id", "text"]);
        assert_eq!(model.get("model.audit.Keyed").unwrap().sorted_field_names(), vec!["code"]);
    }

    #[test]
    fn test_framework_modules_are_excluded() {
        let mods = modules(&[
            ("mongoengine.document", "class Document(BaseDocument):\n    pass\n"),
            ("model.a", "class A(Document):\n    x = IntField()\n"),
        ]);
        let model = DocumentModel::discover(&mods, "mongoengine");
        assert_eq!(model.len(), 1);
        assert!(model.contains("model.a.A"));
    }

    #[test]
    fn test_field_targets_resolve_by_name_literal_and_self() {
        let mods = modules(&[
            ("model.patient", "class Patient(Document):\n    name = StringField()\n"),
            (
                "model.visit",
                r#"
from .patient import Patient as P

class Visit(Document):
    patient = ReferenceField(P)
    previous = ReferenceField('self')
    by_name = ReferenceField('Patient')
    missing = ReferenceField('Nope')
"#,
            ),
        ]);
        let model = DocumentModel::discover(&mods, "mongoengine");
        let visit = model.get("model.visit.Visit").unwrap();
        let target = |name: &str| match &visit.field(name).unwrap().kind {
            FieldKind::Reference { target } => target.clone(),
            other => panic!("unexpected kind {other:?}"),
        };
        assert_eq!(target("patient"), Target::Class("model.patient.Patient".into()));
        assert_eq!(target("previous"), Target::Class("model.visit.Visit".into()));
        assert_eq!(target("by_name"), Target::Class("model.patient.Patient".into()));
        assert_eq!(target("missing"), Target::Unresolved("Nope".into()));
    }

    #[test]
    fn test_nested_documents_keyed_by_qualified_path() {
        let mods = modules(&[
            (
                "model.a",
                "class Group(object):\n    class Item(EmbeddedDocument):\n        x = IntField()\n",
            ),
            (
                "model.b",
                "class Other(object):\n    class Item(EmbeddedDocument):\n        y = IntField()\n",
            ),
        ]);
        let model = DocumentModel::discover(&mods, "mongoengine");
        let keys: Vec<_> = model.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["model.a.Group.Item", "model.b.Other.Item"]);
        assert_eq!(model.get("model.a.Group.Item").unwrap().name, "Item");
    }

    #[test]
    fn test_documents_bound_from_imported_modules_become_classes() {
        let mods = modules(&[
            (
                "model",
                "from shared.audit import Audit\nfrom shared.tags import *\n\nclass Visit(Document):\n    audit = ReferenceField(Audit)\n",
            ),
            (
                "shared.audit",
                "class Audit(Document):\n    who = StringField()\n\nclass Unused(Document):\n    pass\n",
            ),
            ("shared.tags", "class Tag(EmbeddedDocument):\n    label = StringField()\n"),
        ]);
        let model = DocumentModel::discover_with_imports(&mods, 1, "mongoengine");
        let keys: Vec<_> = model.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["model.Visit", "shared.audit.Audit", "shared.tags.Tag"]);
        let visit = model.get("model.Visit").unwrap();
        assert_eq!(
            visit.field("audit").unwrap().kind,
            FieldKind::Reference { target: Target::Class("shared.audit.Audit".into()) }
        );
        assert_eq!(model.get("shared.audit.Audit").unwrap().sorted_field_names(), vec!["id", "who"]);
    }

    #[test]
    fn test_cyclic_star_import_package_discovers_every_document() {
        let n = 14;
        let init: String = (0..n).map(|i| format!("from .m{i} import *\n")).collect();
        let sources: Vec<(String, String)> = std::iter::once(("model".to_string(), init))
            .chain((0..n).map(|i| {
                (
                    format!("model.m{i}"),
                    format!(
                        "from mongoengine import *\nfrom model import *\n\nclass Mixin{i}(object):\n    pass\n\nclass D{i}(Mixin{i}, Document):\n    name = StringField()\n"
                    ),
                )
            }))
            .collect();
        let parser = ModelParser::new();
        let mods: Vec<ParsedModule> = sources
            .iter()
            .enumerate()
            .map(|(i, (name, src))| parser.parse_module(src, name, i == 0))
            .collect();
        let model = DocumentModel::discover(&mods, "mongoengine");
        assert_eq!(model.len(), n);
        assert!(model.iter().all(|c| c.bases.len() == 1 && c.bases[0].contains(".Mixin")));
        assert!(!model.contains("model.m0.Mixin0"));
    }
}
