//! docmodel-diagram: UML class diagrams for MongoEngine document models
//!
//! Read a MongoEngine model package from source, discover its document
//! classes and fields, infer associations and inheritance, and render the
//! result as a Graphviz digraph.
//!
//! # Pipeline
//! - `loader`: dotted module names → source files; packages expand to submodules
//! - `parser`: class declarations, bases, fields (as `FieldKind` variants), imports
//! - `model`: document class discovery and field extraction
//! - `graph`: association inference (repeated unwrapping, reference types,
//!   lookup table) and the class hierarchy
//! - `visualization`: DOT, JSON and SVG rendering
//!
//! # Quickstart (Library)
//! ```no_run
//! use docmodel_diagram::graph::ClassDiagram;
//! use docmodel_diagram::utils::config::DiagramOptions;
//! use docmodel_diagram::visualization::DotGenerator;
//!
//! let opts = DiagramOptions { root: "backend".into(), ..DiagramOptions::default() };
//! let diagram = ClassDiagram::build(&opts).expect("build diagram");
//! print!("{}", DotGenerator::new().generate_dot(&diagram).expect("render"));
//! ```
//!
//! # Quickstart (CLI)
//! ```text
//! docmodel-diagram localhost clinic --root backend > model.dot
//! docmodel-diagram localhost clinic --root backend -m model.visit --format json
//! ```
pub mod app;
pub mod cli;
pub mod errors;
pub mod graph;
pub mod loader;
pub mod model;
pub mod parser;
pub mod utils;
pub mod visualization;
