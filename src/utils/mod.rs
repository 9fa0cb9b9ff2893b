pub mod config {
    use crate::errors::ConfigError;
    use crate::graph::LookupTable;
    use serde::Deserialize;
    use std::fs;
    use std::path::{Path, PathBuf};

    pub const DEFAULT_MODULES: &[&str] = &["model"];
    pub const DEFAULT_FRAMEWORK_PREFIX: &str = "mongoengine";
    pub const DEFAULT_GRAPH_NAME: &str = "class_diagram";
    pub const CONFIG_FILE_NAME: &str = "docmodel-diagram.toml";

    /// Associations for fields such as `ObjectIdField`s, or fields that
    /// reference other documents without a `ReferenceField`.
    pub const DEFAULT_LOOKUP: &[(&str, &str)] = &[
        ("model.drugs.StandardFrequencies.active_ingredient", "model.drugs.ActiveIngredient"),
        ("model.meds.MedOrder.active_ingredient", "model.drugs.ActiveIngredient"),
        ("model.allergies.AllergyUpdate.substance_din", "model.drugs.Drug"),
        ("model.allergies.DrugAllergy.substance_din", "model.drugs.Drug"),
        ("model.visit.Visit.patient_id", "model.patient.Patient"),
        ("model.sphafib.requisitions.Requisition.visit_id", "model.visit.Visit"),
        ("model.sphafib.requisitions.Requisition.pt_id", "model.patient.Patient"),
        ("model.sphafib.charts.ModalityFilter.user", "model.user.User"),
        ("model.sphafib.allergies.Assessment.visit_id", "model.visit.Visit"),
        ("model.sphafib.allergies.Assessment.pt_id", "model.patient.Patient"),
    ];

    /// On-disk configuration; every key is optional.
    #[derive(Debug, Clone, Deserialize, Default)]
    pub struct Config {
        pub root: Option<String>,
        pub modules: Option<Vec<String>>,
        pub framework_prefix: Option<String>,
        pub graph_name: Option<String>,
        /// Replaces the built-in table when present.
        pub lookup: Option<LookupTable>,
    }

    /// Effective settings for one diagram build.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DiagramOptions {
        pub root: PathBuf,
        pub modules: Vec<String>,
        pub framework_prefix: String,
        pub graph_name: String,
        pub lookup: LookupTable,
        pub respect_ignore: bool,
    }

    impl Default for DiagramOptions {
        fn default() -> Self {
            Self {
                root: PathBuf::from("."),
                modules: DEFAULT_MODULES.iter().map(|m| (*m).to_string()).collect(),
                framework_prefix: DEFAULT_FRAMEWORK_PREFIX.to_string(),
                graph_name: DEFAULT_GRAPH_NAME.to_string(),
                lookup: DEFAULT_LOOKUP.iter().copied().collect(),
                respect_ignore: false,
            }
        }
    }

    impl DiagramOptions {
        /// Overlay the keys present in `cfg`. A relative `root` is taken
        /// relative to `base` (the config file's directory).
        pub fn apply(&mut self, cfg: Config, base: Option<&Path>) {
            if let Some(root) = cfg.root {
                let root = PathBuf::from(root);
                self.root = match base {
                    Some(b) if root.is_relative() => b.join(root),
                    _ => root,
                };
            }
            if let Some(modules) = cfg.modules {
                self.modules = modules;
            }
            if let Some(prefix) = cfg.framework_prefix {
                self.framework_prefix = prefix;
            }
            if let Some(name) = cfg.graph_name {
                self.graph_name = name;
            }
            if let Some(lookup) = cfg.lookup {
                self.lookup = lookup;
            }
        }
    }

    /// Read and parse a TOML config file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or is not valid TOML
    /// for `Config`.
    pub fn load_config_at(path: &Path) -> Result<Config, ConfigError> {
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { file: path.to_path_buf(), source })?;
        toml::from_str::<Config>(&data)
            .map_err(|source| ConfigError::Toml { file: path.to_path_buf(), source })
    }

    /// Look for `docmodel-diagram.toml` in `root`.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn load_config_near(root: &Path) -> Result<Option<Config>, ConfigError> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.is_file() {
            load_config_at(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_defaults_carry_builtin_table() {
            let opts = DiagramOptions::default();
            assert_eq!(opts.modules, vec!["model".to_string()]);
            assert_eq!(opts.lookup, DEFAULT_LOOKUP.iter().copied().collect::<LookupTable>());
            assert_eq!(
                opts.lookup.get("model.visit.Visit.patient_id"),
                Some("model.patient.Patient")
            );
        }

        #[test]
        fn test_apply_overrides_only_present_keys() {
            let cfg: Config = toml::from_str(
                "root = \"src\"\ngraph_name = \"g\"\n[lookup]\n\"a.B.c\" = \"a.D\"\n",
            )
            .unwrap();
            let mut opts = DiagramOptions::default();
            opts.apply(cfg, Some(Path::new("/proj")));
            assert_eq!(opts.root, PathBuf::from("/proj/src"));
            assert_eq!(opts.graph_name, "g");
            assert_eq!(opts.framework_prefix, DEFAULT_FRAMEWORK_PREFIX);
            assert_eq!(opts.lookup.get("model.visit.Visit.patient_id"), None);
            assert_eq!(opts.lookup.get("a.B.c"), Some("a.D"));
        }
    }
}

pub mod file_walker {
    use std::path::{Path, PathBuf};

    /// Direct children of `dir` (files and directories). `.gitignore`/`.ignore`
    /// rules apply only when `respect_ignore` is set; global git excludes are
    /// always off so results do not depend on the user's setup.
    #[must_use]
    pub fn package_entries(dir: &Path, respect_ignore: bool) -> Vec<PathBuf> {
        let mut walker = ignore::WalkBuilder::new(dir);
        walker
            .max_depth(Some(1))
            .follow_links(false)
            .hidden(true)
            .git_ignore(respect_ignore)
            .git_global(false)
            .git_exclude(false)
            .ignore(respect_ignore)
            .parents(respect_ignore)
            .require_git(false);
        let mut out: Vec<PathBuf> = walker
            .build()
            .flatten()
            .filter(|entry| entry.depth() == 1)
            .map(ignore::DirEntry::into_path)
            .collect();
        out.sort();
        out
    }
}
