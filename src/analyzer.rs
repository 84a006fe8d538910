//! Static-analysis seam for the dependency graph.
//!
//! The graph engine does not parse source itself; it asks a [`StaticAnalyzer`]
//! for a file's dependency surface. [`SourceScanner`] is the built-in
//! line-oriented implementation for Rust and Python sources. It is advisory:
//! good enough to seed the graph, not a compiler.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

/// One exported or imported symbol, with the line it was found on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub kind: String,
    pub line: usize,
}

/// Dependency surface of a single file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// Module paths this file depends on.
    pub dependencies: BTreeSet<String>,
    /// Imported name -> origin info.
    pub imports: BTreeMap<String, SymbolInfo>,
    /// Exported name -> definition info.
    pub exports: BTreeMap<String, SymbolInfo>,
}

pub trait StaticAnalyzer: Send + Sync {
    fn analyze_file(&self, path: &Path) -> Result<FileAnalysis>;

    /// Files the analyzer considers part of the project, for full rebuilds.
    fn project_files(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Line-based scanner for `.rs` and `.py` files rooted at a project directory.
#[derive(Debug, Clone)]
pub struct SourceScanner {
    root: PathBuf,
}

impl SourceScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scan_rust(content: &str, analysis: &mut FileAnalysis) {
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            let lineno = idx + 1;

            if let Some(rest) = line.strip_prefix("use ") {
                let module = rest
                    .trim_end_matches(';')
                    .split("::")
                    .next()
                    .unwrap_or("")
                    .trim();
                if !module.is_empty() && module != "crate" && module != "super" {
                    analysis.dependencies.insert(module.to_string());
                    let name = rest
                        .trim_end_matches(';')
                        .rsplit("::")
                        .next()
                        .unwrap_or(module)
                        .trim();
                    analysis.imports.insert(
                        name.to_string(),
                        SymbolInfo {
                            kind: "use".to_string(),
                            line: lineno,
                        },
                    );
                }
            } else if let Some(name) = Self::pub_item(line, "pub fn ") {
                analysis.exports.insert(
                    name,
                    SymbolInfo {
                        kind: "function".to_string(),
                        line: lineno,
                    },
                );
            } else if let Some(name) = Self::pub_item(line, "pub struct ") {
                analysis.exports.insert(
                    name,
                    SymbolInfo {
                        kind: "struct".to_string(),
                        line: lineno,
                    },
                );
            } else if let Some(name) = Self::pub_item(line, "pub enum ") {
                analysis.exports.insert(
                    name,
                    SymbolInfo {
                        kind: "enum".to_string(),
                        line: lineno,
                    },
                );
            } else if let Some(name) = Self::pub_item(line, "pub trait ") {
                analysis.exports.insert(
                    name,
                    SymbolInfo {
                        kind: "trait".to_string(),
                        line: lineno,
                    },
                );
            }
        }
    }

    fn scan_python(content: &str, analysis: &mut FileAnalysis) {
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            let lineno = idx + 1;

            if let Some(rest) = line.strip_prefix("import ") {
                for module in rest.split(',') {
                    let module = module.split_whitespace().next().unwrap_or("");
                    if !module.is_empty() {
                        analysis.dependencies.insert(module.to_string());
                        analysis.imports.insert(
                            module.to_string(),
                            SymbolInfo {
                                kind: "import".to_string(),
                                line: lineno,
                            },
                        );
                    }
                }
            } else if let Some(rest) = line.strip_prefix("from ") {
                if let Some(module) = rest.split_whitespace().next() {
                    analysis.dependencies.insert(module.to_string());
                    if let Some(names) = rest.split(" import ").nth(1) {
                        for name in names.split(',') {
                            let name = name.split_whitespace().next().unwrap_or("");
                            if !name.is_empty() {
                                analysis.imports.insert(
                                    name.to_string(),
                                    SymbolInfo {
                                        kind: "from_import".to_string(),
                                        line: lineno,
                                    },
                                );
                            }
                        }
                    }
                }
            } else if let Some(name) = Self::def_item(line, "def ") {
                analysis.exports.insert(
                    name,
                    SymbolInfo {
                        kind: "function".to_string(),
                        line: lineno,
                    },
                );
            } else if let Some(name) = Self::def_item(line, "class ") {
                analysis.exports.insert(
                    name,
                    SymbolInfo {
                        kind: "class".to_string(),
                        line: lineno,
                    },
                );
            }
        }
    }

    fn pub_item(line: &str, prefix: &str) -> Option<String> {
        let rest = line.strip_prefix(prefix)?;
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        (!name.is_empty()).then_some(name)
    }

    fn def_item(line: &str, prefix: &str) -> Option<String> {
        let rest = line.strip_prefix(prefix)?;
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        (!name.is_empty()).then_some(name)
    }
}

impl StaticAnalyzer for SourceScanner {
    fn analyze_file(&self, path: &Path) -> Result<FileAnalysis> {
        let full_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let ext = full_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if ext != "rs" && ext != "py" {
            return Err(MeshError::Analyzer(format!(
                "unsupported source type: {}",
                full_path.display()
            )));
        }

        let content = std::fs::read_to_string(&full_path)?;
        let mut analysis = FileAnalysis::default();
        match ext {
            "rs" => Self::scan_rust(&content, &mut analysis),
            _ => Self::scan_python(&content, &mut analysis),
        }
        Ok(analysis)
    }

    fn project_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let hidden = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with('.') || n == "target");
                    if !hidden {
                        stack.push(path);
                    }
                } else if path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "rs" || e == "py")
                {
                    if let Ok(rel) = path.strip_prefix(&self.root) {
                        files.push(rel.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
        }

        files.sort();
        files
    }
}
