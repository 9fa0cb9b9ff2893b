//! Class diagram model and the passes that populate it.
//!
//! A `ClassDiagram` holds the discovered document classes (nodes), the
//! association edges inferred from their fields, and the inheritance edges
//! between discovered classes. Build one with `ClassDiagram::build` and hand
//! it to `crate::visualization` for rendering.
use crate::errors::DiagramError;
use crate::loader::ModuleLoader;
use crate::model::{DocumentClass, DocumentModel, FieldKind, Target};
use crate::parser::{ModelParser, ParsedModule};
use crate::utils::config::DiagramOptions;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    OneToOne,
    OneToMany,
    Inheritance,
}

impl EdgeKind {
    /// DOT attributes for this kind of edge, in emission order.
    #[must_use]
    pub fn attributes(self) -> &'static [(&'static str, &'static str)] {
        match self {
            EdgeKind::OneToOne => &[("arrowhead", "none"), ("arrowtail", "none")],
            EdgeKind::OneToMany => &[
                ("arrowhead", "none"),
                ("arrowtail", "none"),
                ("headlabel", "*"),
                ("taillabel", "1"),
            ],
            EdgeKind::Inheritance => &[("arrowhead", "normal"), ("arrowtail", "normal")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    /// Field the association was inferred from; `None` for inheritance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Maps `<module>.<class>.<field>` to the fully-qualified class the field
/// refers to, for fields whose declaration carries no target type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LookupTable {
    entries: HashMap<String, String>,
}

impl LookupTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.entries.get(field).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LookupTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/// Advisory findings; they never abort a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Identifier field with no reference type and no lookup entry.
    UnmappedIdentifier { field: String },
    /// Reference or embedded field whose target is not a discovered class.
    UnresolvedReference { field: String, target: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnmappedIdentifier { field } => write!(f, "{field} does not have mapping"),
            Warning::UnresolvedReference { field, target } if target.is_empty() => {
                write!(f, "{field} does not declare a document type")
            }
            Warning::UnresolvedReference { field, target } => {
                write!(f, "{field} refers to '{target}', which is not a discovered document class")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Associations {
    pub edges: Vec<Edge>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassDiagram {
    pub name: String,
    pub model: DocumentModel,
    pub associations: Vec<Edge>,
    pub hierarchy: Vec<Edge>,
    pub warnings: Vec<Warning>,
}

impl ClassDiagram {
    /// Load, parse and analyse the configured modules.
    ///
    /// # Errors
    /// Returns `DiagramError` if a module cannot be found or read, or if a
    /// lookup-table entry that applies to a field names no discovered class.
    pub fn build(opts: &DiagramOptions) -> Result<Self, DiagramError> {
        let loader = ModuleLoader::new(&opts.root).with_respect_ignore(opts.respect_ignore);
        let parser = ModelParser::new();
        let mut parsed: Vec<ParsedModule> = loader
            .load_all(&opts.modules)?
            .iter()
            .map(|m| parser.parse_module(&m.source, &m.name, m.is_package))
            .collect();
        let scanned = parsed.len();

        // Pull in modules under the root that the scanned ones import from,
        // transitively, so imported documents and bases can be resolved.
        let prefix = opts.framework_prefix.as_str();
        let mut known: HashSet<String> = parsed.iter().map(|m| m.name.clone()).collect();
        let mut next = 0;
        while next < parsed.len() {
            let wanted = parsed[next].imported_modules();
            next += 1;
            for name in wanted {
                if (!prefix.is_empty() && name.starts_with(prefix)) || !known.insert(name.clone()) {
                    continue;
                }
                if let Some(m) = loader.load_imported(&name)? {
                    log::debug!("loaded imported module {} from {}", m.name, m.path.display());
                    parsed.push(parser.parse_module(&m.source, &m.name, m.is_package));
                }
            }
        }

        let model = DocumentModel::discover_with_imports(&parsed, scanned, prefix);
        Self::from_model(&opts.graph_name, model, &opts.lookup)
    }

    /// Run association and hierarchy inference over an already discovered model.
    ///
    /// # Errors
    /// Returns `DiagramError::UnresolvedLookupTarget` when a lookup entry that
    /// applies to a field names no discovered class.
    pub fn from_model(
        name: &str,
        model: DocumentModel,
        lookup: &LookupTable,
    ) -> Result<Self, DiagramError> {
        let Associations { edges, warnings } = find_associations(&model, lookup)?;
        let hierarchy = find_class_hierarchy(&model);
        Ok(Self { name: name.to_string(), model, associations: edges, hierarchy, warnings })
    }

    /// Association edges followed by hierarchy edges.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.associations.iter().chain(self.hierarchy.iter())
    }
}

/// Infer association edges for every field of every class, in discovery order.
///
/// # Errors
/// Returns `DiagramError::UnresolvedLookupTarget` when a lookup entry that
/// applies to a field names no discovered class.
pub fn find_associations(
    model: &DocumentModel,
    lookup: &LookupTable,
) -> Result<Associations, DiagramError> {
    let mut out = Associations::default();
    for class in model.iter() {
        for field in &class.fields {
            let inference = Inference { model, lookup, class, field_name: &field.name };
            if let Some(edge) = inference.run(Some(&field.kind), EdgeKind::OneToOne, &mut out.warnings)? {
                out.edges.push(edge);
            }
        }
    }
    Ok(out)
}

/// One inheritance edge per immediate base that is itself a discovered class.
#[must_use]
pub fn find_class_hierarchy(model: &DocumentModel) -> Vec<Edge> {
    let mut edges = Vec::new();
    for class in model.iter() {
        for base in &class.bases {
            if model.contains(base) {
                edges.push(Edge {
                    from: class.key.clone(),
                    to: base.clone(),
                    kind: EdgeKind::Inheritance,
                    field: None,
                });
            }
        }
    }
    edges
}

// Warnings are logged as they are found, so the ones raised before a fatal
// lookup error still reach the user.
fn report(warnings: &mut Vec<Warning>, warning: Warning) {
    log::warn!("Warning: {warning}");
    warnings.push(warning);
}

struct Inference<'a> {
    model: &'a DocumentModel,
    lookup: &'a LookupTable,
    class: &'a DocumentClass,
    field_name: &'a str,
}

impl Inference<'_> {
    fn qualified_field(&self) -> String {
        format!("{}.{}", self.class.key, self.field_name)
    }

    fn edge(&self, to: &str, kind: EdgeKind) -> Edge {
        Edge {
            from: self.class.key.clone(),
            to: to.to_string(),
            kind,
            field: Some(self.field_name.to_string()),
        }
    }

    // Priority: repeated unwrapping, declared reference/embedded target,
    // lookup table, then the unmapped-identifier warning.
    fn run(
        &self,
        kind: Option<&FieldKind<Target>>,
        factory: EdgeKind,
        warnings: &mut Vec<Warning>,
    ) -> Result<Option<Edge>, DiagramError> {
        match kind {
            Some(FieldKind::Repeated { inner }) => {
                self.run(inner.as_deref(), EdgeKind::OneToMany, warnings)
            }
            Some(FieldKind::Reference { target } | FieldKind::Embedded { target }) => {
                match target {
                    Target::Class(fq) if self.model.contains(fq) => Ok(Some(self.edge(fq, factory))),
                    Target::Class(raw) | Target::Unresolved(raw) => {
                        report(
                            warnings,
                            Warning::UnresolvedReference {
                                field: self.qualified_field(),
                                target: raw.clone(),
                            },
                        );
                        Ok(None)
                    }
                }
            }
            _ => {
                let fq_field = self.qualified_field();
                if let Some(dst) = self.lookup.get(&fq_field) {
                    if !self.model.contains(dst) {
                        return Err(DiagramError::UnresolvedLookupTarget {
                            field: fq_field,
                            target: dst.to_string(),
                        });
                    }
                    return Ok(Some(self.edge(dst, factory)));
                }
                if self.field_name != "id" && matches!(kind, Some(FieldKind::Identifier)) {
                    report(warnings, Warning::UnmappedIdentifier { field: fq_field });
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ModelParser;

    fn model(sources: &[(&str, &str)]) -> DocumentModel {
        let parser = ModelParser::new();
        let parsed: Vec<_> = sources
            .iter()
            .map(|(name, src)| parser.parse_module(src, name, false))
            .collect();
        DocumentModel::discover(&parsed, "mongoengine")
    }

    #[test]
    fn test_edge_attributes_per_kind() {
        assert_eq!(EdgeKind::OneToOne.attributes(), &[("arrowhead", "none"), ("arrowtail", "none")]);
        let many = EdgeKind::OneToMany.attributes();
        assert!(many.contains(&("headlabel", "*")));
        assert!(many.contains(&("taillabel", "1")));
        assert_eq!(
            EdgeKind::Inheritance.attributes(),
            &[("arrowhead", "normal"), ("arrowtail", "normal")]
        );
    }

    #[test]
    fn test_lookup_table_maps_identifier_field() {
        let m = model(&[
            ("model.patient", "class Patient(Document):\n    name = StringField()\n"),
            ("model.visit", "class Visit(Document):\n    patient_id = ObjectIdField()\n"),
        ]);
        let lookup: LookupTable =
            [("model.visit.Visit.patient_id", "model.patient.Patient")].into_iter().collect();
        let assoc = find_associations(&m, &lookup).unwrap();
        assert!(assoc.warnings.is_empty());
        assert_eq!(
            assoc.edges,
            vec![Edge {
                from: "model.visit.Visit".into(),
                to: "model.patient.Patient".into(),
                kind: EdgeKind::OneToOne,
                field: Some("patient_id".into()),
            }]
        );
    }

    #[test]
    fn test_lookup_applies_to_scalar_fields_and_repeated_wrappers() {
        let m = model(&[(
            "model.charts",
            r#"
class User(Document):
    pass

class ModalityFilter(Document):
    user = StringField()
    watchers = ListField(ObjectIdField())
    owners = ListField()
"#,
        )]);
        let lookup: LookupTable = [
            ("model.charts.ModalityFilter.user", "model.charts.User"),
            ("model.charts.ModalityFilter.owners", "model.charts.User"),
        ]
        .into_iter()
        .collect();
        let assoc = find_associations(&m, &lookup).unwrap();
        let kinds: Vec<_> =
            assoc.edges.iter().map(|e| (e.field.as_deref().unwrap(), e.kind)).collect();
        assert_eq!(kinds, vec![("user", EdgeKind::OneToOne), ("owners", EdgeKind::OneToMany)]);
        // the repeated identifier has no entry and is reported once
        assert_eq!(
            assoc.warnings,
            vec![Warning::UnmappedIdentifier {
                field: "model.charts.ModalityFilter.watchers".into()
            }]
        );
    }

    #[test]
    fn test_structural_reference_wins_over_lookup() {
        let m = model(&[(
            "model.m",
            "class A(Document):\n    pass\nclass B(Document):\n    pass\nclass C(Document):\n    a = ReferenceField(A)\n",
        )]);
        let lookup: LookupTable = [("model.m.C.a", "model.m.B")].into_iter().collect();
        let assoc = find_associations(&m, &lookup).unwrap();
        assert_eq!(assoc.edges.len(), 1);
        assert_eq!(assoc.edges[0].to, "model.m.A");
    }

    #[test]
    fn test_unresolvable_lookup_target_is_fatal() {
        let m = model(&[("model.v", "class Visit(Document):\n    pt_id = ObjectIdField()\n")]);
        let lookup: LookupTable = [("model.v.Visit.pt_id", "model.gone.Patient")].into_iter().collect();
        let err = find_associations(&m, &lookup).unwrap_err();
        assert!(matches!(
            err,
            DiagramError::UnresolvedLookupTarget { ref field, ref target }
                if field == "model.v.Visit.pt_id" && target == "model.gone.Patient"
        ));
    }

    #[test]
    fn test_unmapped_identifier_warns_once_and_id_is_exempt() {
        let m = model(&[("model.v", "class Visit(Document):\n    doctor_id = ObjectIdField()\n")]);
        let assoc = find_associations(&m, &LookupTable::new()).unwrap();
        assert!(assoc.edges.is_empty());
        assert_eq!(assoc.warnings.len(), 1);
        assert_eq!(assoc.warnings[0].to_string(), "model.v.Visit.doctor_id does not have mapping");
    }

    #[test]
    fn test_hierarchy_skips_undiscovered_bases_and_handles_multiple() {
        let m = model(&[(
            "model.h",
            r#"
class Named(Document):
    meta = {'abstract': True}
    name = StringField()

class Dated(Document):
    meta = {'abstract': True}
    when = DateTimeField()

class Event(Named, Dated, SomeMixin):
    pass
"#,
        )]);
        let edges = find_class_hierarchy(&m);
        let pairs: Vec<_> = edges.iter().map(|e| (e.from.as_str(), e.to.as_str())).collect();
        assert_eq!(pairs, vec![("model.h.Event", "model.h.Named"), ("model.h.Event", "model.h.Dated")]);
        assert!(edges.iter().all(|e| e.kind == EdgeKind::Inheritance && e.field.is_none()));
    }

    #[test]
    fn test_lazy_and_cached_references_need_a_lookup_entry() {
        let m = model(&[(
            "model.v",
            r#"
class Patient(Document):
    pass

class Visit(Document):
    patient = LazyReferenceField('Patient')
    doctor = CachedReferenceField('Patient')
"#,
        )]);
        let lookup: LookupTable = [("model.v.Visit.doctor", "model.v.Patient")].into_iter().collect();
        let assoc = find_associations(&m, &lookup).unwrap();
        assert!(assoc.warnings.is_empty());
        let fields: Vec<_> = assoc.edges.iter().map(|e| e.field.as_deref().unwrap()).collect();
        assert_eq!(fields, vec!["doctor"]);
    }

    #[test]
    fn test_warnings_before_a_fatal_lookup_are_kept_in_order() {
        let m = model(&[(
            "model.v",
            "class Visit(Document):\n    doctor_id = ObjectIdField()\n    pt_id = ObjectIdField()\n",
        )]);
        let lookup: LookupTable = [("model.v.Visit.pt_id", "model.gone.Patient")].into_iter().collect();
        let mut warnings = Vec::new();
        let class = m.get("model.v.Visit").unwrap();
        for field in &class.fields {
            let inference = Inference { model: &m, lookup: &lookup, class, field_name: &field.name };
            if inference.run(Some(&field.kind), EdgeKind::OneToOne, &mut warnings).is_err() {
                break;
            }
        }
        assert_eq!(
            warnings,
            vec![Warning::UnmappedIdentifier { field: "model.v.Visit.doctor_id".into() }]
        );
    }
}
