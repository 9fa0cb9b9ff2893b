use crate::errors::DiagramError;
use crate::graph::{ClassDiagram, Edge};
use std::fmt::Write as _;

#[derive(Debug, Default)]
pub struct DotGenerator;

impl DotGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {}
    }

    /// Render the diagram as a Graphviz record-shaped digraph.
    ///
    /// Nodes come in discovery order, then association edges, then hierarchy
    /// edges.
    ///
    /// # Errors
    /// Returns a `DiagramError` if DOT generation fails for any reason.
    pub fn generate_dot(&self, diagram: &ClassDiagram) -> Result<String, DiagramError> {
        let mut s = String::new();
        let _ = writeln!(s, "digraph {} {{", graph_id(&diagram.name));
        s.push_str("  node[shape=record];\n");

        for class in diagram.model.iter() {
            let fields = class
                .sorted_field_names()
                .into_iter()
                .map(escape_record)
                .collect::<Vec<_>>()
                .join(" | ");
            let name = escape_record(&class.name);
            // An empty class keeps its (empty) attribute compartment.
            let label = format!("{{{name} | {fields}}}");
            let _ = writeln!(s, "  \"{}\" [label=\"{}\"];", escape_id(&class.key), escape_id(&label));
        }

        for edge in diagram.edges() {
            let _ = writeln!(
                s,
                "  \"{}\" -> \"{}\" {}",
                escape_id(&edge.from),
                escape_id(&edge.to),
                edge_style(edge)
            );
        }

        s.push_str("}\n");
        Ok(s)
    }
}

#[derive(Debug, Default)]
pub struct JsonGenerator;

impl JsonGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {}
    }

    /// # Errors
    /// Returns `DiagramError::Visualization` if serialization fails.
    pub fn generate_json(&self, diagram: &ClassDiagram) -> Result<String, DiagramError> {
        serde_json::to_string_pretty(diagram)
            .map_err(|e| DiagramError::Visualization(format!("JSON encode error: {e}")))
    }
}

#[derive(Debug, Default)]
pub struct SvgGenerator;

impl SvgGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {}
    }

    /// Generate an SVG rendering using Graphviz.
    ///
    /// # Errors
    /// Returns `DiagramError::Visualization` if invoking Graphviz fails,
    /// if the process exits with a non-success status, or if its output is not valid UTF-8.
    pub fn generate_svg(&self, diagram: &ClassDiagram) -> Result<String, DiagramError> {
        let dot = DotGenerator::new().generate_dot(diagram)?;
        let output = std::process::Command::new("dot")
            .arg("-Tsvg")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .and_then(|mut child| {
                use std::io::Write;
                if let Some(stdin) = child.stdin.as_mut() {
                    stdin.write_all(dot.as_bytes())?;
                }
                child.wait_with_output()
            })
            .map_err(|e| DiagramError::Visualization(format!("Failed to run graphviz 'dot': {e}")))?;
        if !output.status.success() {
            return Err(DiagramError::Visualization(format!(
                "Graphviz 'dot' failed with code {:?}",
                output.status.code()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| DiagramError::Visualization(format!("Invalid UTF-8 from dot: {e}")))
    }
}

fn edge_style(edge: &Edge) -> String {
    let attrs: Vec<String> =
        edge.kind.attributes().iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
    format!("[{}]", attrs.join(", "))
}

// Graph names go unquoted when they are plain identifiers.
fn graph_id(name: &str) -> String {
    let plain = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", escape_id(name))
    }
}

fn escape_id(s: &str) -> String {
    s.replace('"', "\\\"")
}

fn escape_record(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '{' | '}' | '|' | '<' | '>') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
