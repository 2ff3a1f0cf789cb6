//! Toolchain descriptors: how to compile and run one guest language.
//!
//! Descriptors are plain configuration data. Command templates may contain
//! the placeholders `{source}`, `{artifact}`, `{name}` and `{dir}`, which are
//! filled in from the request's workspace (see [`TemplateVars`]).

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Configuration record for a single guest language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainDescriptor {
    /// Language identifier (registry key), e.g. "python".
    pub language: String,

    /// Source file extension without the leading dot.
    pub extension: String,

    /// How to build the source. `None` means the language is interpreted.
    #[serde(default)]
    pub compile: Option<CompileStrategy>,

    /// Command that runs the program: program name followed by arguments.
    pub run: Vec<String>,

    /// Wall-clock limit for the run stage, overriding the global default.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Virtual-memory ceiling for the run stage, overriding the global default.
    #[serde(default)]
    pub memory_mb: Option<u64>,
}

/// How a compiled language turns its source into a runnable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CompileStrategy {
    /// One compiler invocation, source path in, artifact path out.
    SingleArtifact {
        /// Compile command template.
        command: Vec<String>,
    },
    /// A build system run from inside the workspace with no path arguments.
    ProjectBuild {
        /// Build command template.
        command: Vec<String>,
        /// Artifact location relative to the workspace directory.
        artifact: String,
        /// Project manifest to write before building.
        #[serde(default)]
        manifest: Option<ProjectManifest>,
    },
}

/// A build-system manifest written into the workspace before a project build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    /// File name inside the workspace directory.
    pub file_name: String,
    /// File contents; placeholders are expanded.
    pub contents: String,
}

impl ToolchainDescriptor {
    /// Whether this language needs a compile stage before running.
    pub const fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Create a descriptor for an interpreted language.
    pub fn interpreted(language: &str, extension: &str, run: &[&str]) -> Self {
        Self {
            language: language.to_string(),
            extension: extension.to_string(),
            compile: None,
            run: to_owned_args(run),
            timeout_seconds: None,
            memory_mb: None,
        }
    }

    /// Create a descriptor for a language with a single-artifact compiler.
    pub fn single_artifact(language: &str, extension: &str, compile: &[&str], run: &[&str]) -> Self {
        Self {
            language: language.to_string(),
            extension: extension.to_string(),
            compile: Some(CompileStrategy::SingleArtifact {
                command: to_owned_args(compile),
            }),
            run: to_owned_args(run),
            timeout_seconds: None,
            memory_mb: None,
        }
    }
}

fn to_owned_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

const LAKEFILE: &str = "import Lake
open Lake DSL

package «{name}»

@[default_target]
lean_exe «{name}» where
  root := `{name}
";

/// The toolchains shipped with the daemon.
pub fn builtin_toolchains() -> Vec<ToolchainDescriptor> {
    vec![
        ToolchainDescriptor::interpreted("python", "py", &["python3", "{source}"]),
        ToolchainDescriptor::single_artifact(
            "cpp",
            "cpp",
            &["g++", "{source}", "-o", "{artifact}"],
            &["./{name}"],
        ),
        ToolchainDescriptor::single_artifact(
            "rust",
            "rs",
            &["rustc", "{source}", "-o", "{artifact}"],
            &["./{name}"],
        ),
        ToolchainDescriptor::single_artifact(
            "haskell",
            "hs",
            &["ghc", "{source}", "-o", "{artifact}"],
            &["./{name}"],
        ),
        ToolchainDescriptor {
            language: "lean4".to_string(),
            extension: "lean".to_string(),
            compile: Some(CompileStrategy::ProjectBuild {
                command: to_owned_args(&["lake", "build"]),
                artifact: ".lake/build/bin/{name}".to_string(),
                manifest: Some(ProjectManifest {
                    file_name: "lakefile.lean".to_string(),
                    contents: LAKEFILE.to_string(),
                }),
            }),
            run: to_owned_args(&["./.lake/build/bin/{name}"]),
            timeout_seconds: None,
            memory_mb: None,
        },
    ]
}

/// Values substituted into command templates for one request.
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub source: &'a Path,
    pub artifact: Option<&'a Path>,
    pub name: &'a str,
    pub dir: &'a Path,
}

impl TemplateVars<'_> {
    /// Replace every placeholder in `template`.
    ///
    /// `{artifact}` expands to an empty string for interpreted languages.
    pub fn expand(&self, template: &str) -> String {
        let artifact = self
            .artifact
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        template
            .replace("{source}", &self.source.to_string_lossy())
            .replace("{artifact}", &artifact)
            .replace("{name}", self.name)
            .replace("{dir}", &self.dir.to_string_lossy())
    }

    /// Expand a whole command template into `(program, args)`.
    ///
    /// A program written as `./x` is resolved against the workspace directory,
    /// so the result does not depend on the daemon's own working directory.
    pub fn command(&self, template: &[String]) -> Option<(String, Vec<String>)> {
        let (program, args) = template.split_first()?;
        let program = self.expand(program);
        let program = match program.strip_prefix("./") {
            Some(relative) => self.dir.join(relative).to_string_lossy().into_owned(),
            None => program,
        };
        Some((program, args.iter().map(|a| self.expand(a)).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn builtins_cover_expected_languages() {
        let mut ids: Vec<_> = builtin_toolchains().into_iter().map(|d| d.language).collect();
        ids.sort();
        assert_eq!(ids, vec!["cpp", "haskell", "lean4", "python", "rust"]);
    }

    #[test]
    fn compiled_flag_follows_strategy() {
        for desc in builtin_toolchains() {
            assert_eq!(desc.is_compiled(), desc.language != "python", "{}", desc.language);
        }
    }

    #[test]
    fn expand_placeholders() {
        let source = PathBuf::from("/tmp/ws/guest_ab12.rs");
        let artifact = PathBuf::from("/tmp/ws/guest_ab12");
        let vars = TemplateVars {
            source: &source,
            artifact: Some(&artifact),
            name: "guest_ab12",
            dir: Path::new("/tmp/ws"),
        };

        let (program, args) = vars
            .command(&to_owned_args(&["rustc", "{source}", "-o", "{artifact}"]))
            .unwrap();
        assert_eq!(program, "rustc");
        assert_eq!(args, vec!["/tmp/ws/guest_ab12.rs", "-o", "/tmp/ws/guest_ab12"]);
    }

    #[test]
    fn relative_program_resolves_against_workspace() {
        let source = PathBuf::from("/tmp/ws/guest_x.cpp");
        let vars = TemplateVars {
            source: &source,
            artifact: None,
            name: "guest_x",
            dir: Path::new("/tmp/ws"),
        };

        let (program, args) = vars.command(&to_owned_args(&["./{name}"])).unwrap();
        assert_eq!(program, "/tmp/ws/guest_x");
        assert!(args.is_empty());
    }

    #[test]
    fn empty_template_has_no_command() {
        let vars = TemplateVars {
            source: Path::new("/a.py"),
            artifact: None,
            name: "a",
            dir: Path::new("/"),
        };
        assert!(vars.command(&[]).is_none());
    }

    #[test]
    fn parse_descriptor_json() {
        let json = r#"{
            "language": "lean4",
            "extension": "lean",
            "compile": {
                "strategy": "project_build",
                "command": ["lake", "build"],
                "artifact": "build/bin/{name}"
            },
            "run": ["./build/bin/{name}"],
            "timeout_seconds": 20
        }"#;

        let desc: ToolchainDescriptor = serde_json::from_str(json).unwrap();
        assert!(desc.is_compiled());
        assert_eq!(desc.timeout_seconds, Some(20));
        assert!(desc.memory_mb.is_none());
        match desc.compile {
            Some(CompileStrategy::ProjectBuild { artifact, manifest, .. }) => {
                assert_eq!(artifact, "build/bin/{name}");
                assert!(manifest.is_none());
            }
            other => panic!("unexpected strategy: {other:?}"),
        }
    }

    #[test]
    fn parse_interpreted_descriptor() {
        let json = r#"{"language": "ruby", "extension": "rb", "run": ["ruby", "{source}"]}"#;
        let desc: ToolchainDescriptor = serde_json::from_str(json).unwrap();
        assert!(!desc.is_compiled());
    }
}
