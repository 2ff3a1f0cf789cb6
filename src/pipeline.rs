//! The execution pipeline.
//!
//! One request moves through
//! `Created → SourceWritten → (Compiling → Compiled | CompileFailed)? → Running → Ran → Cleaned`.
//! Stages run strictly one after another; the workspace is released on every
//! path out of [`Executor::execute`], and every failure is turned into an
//! [`ExecutionOutcome`]. Nothing is retried.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use crate::config::Config;
use crate::error::ExecError;
use crate::governor::ResourceLimits;
use crate::outcome::{classify_run, Classification, ExecutionOutcome, ExecutionRequest};
use crate::process::{ExitKind, HostProcessRunner, Invocation, ProcessRunner};
use crate::registry::LanguageRegistry;
use crate::toolchain::{CompileStrategy, ToolchainDescriptor};
use crate::workspace::Workspace;

/// Settings shared by every request.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Directory under which workspaces are created.
    pub workspace_root: PathBuf,
    /// Default limits for the run stage.
    pub run_limits: ResourceLimits,
    /// Optional wall-clock limit for the compile stage.
    pub compile_timeout: Option<Duration>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            run_limits: ResourceLimits::default(),
            compile_timeout: None,
        }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workspace_root: config.resolved_workspace_root(),
            run_limits: config.run_limits(),
            compile_timeout: config.compile_timeout(),
        }
    }
}

/// Compiles and runs guest programs.
///
/// Safe to share between concurrent callers: the registry is read-only and
/// each request gets its own workspace.
#[derive(Debug)]
pub struct Executor<R = HostProcessRunner> {
    registry: Arc<LanguageRegistry>,
    runner: R,
    settings: ExecutorSettings,
}

impl<R: ProcessRunner> Executor<R> {
    pub fn new(registry: Arc<LanguageRegistry>, runner: R, settings: ExecutorSettings) -> Self {
        Self {
            registry,
            runner,
            settings,
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub const fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute one request to completion.
    #[instrument(skip(self, request), fields(language = %request.language, code_len = request.code.len()))]
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let Some(descriptor) = self.registry.get(&request.language) else {
            info!("Rejected unsupported language");
            return ExecutionOutcome::failed(Classification::UnsupportedLanguage {
                language: request.language.clone(),
            });
        };

        let workspace =
            match Workspace::acquire(&self.settings.workspace_root, descriptor, &request.code) {
                Ok(ws) => ws,
                Err(e) => return internal_error(&ExecError::from(e)),
            };

        let result = self.run_pipeline(descriptor, &workspace, request).await;
        workspace.close().await;

        match result {
            Ok(outcome) => {
                debug!(classification = %outcome.classification, "Request finished");
                outcome
            }
            Err(e) => internal_error(&e),
        }
    }

    async fn run_pipeline(
        &self,
        descriptor: &ToolchainDescriptor,
        workspace: &Workspace,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, ExecError> {
        match &descriptor.compile {
            Some(strategy) => {
                if let Some(failed) = self.compile(descriptor, strategy, workspace).await? {
                    return Ok(failed);
                }
            }
            None => debug!("Compile skipped"),
        }

        self.run(descriptor, workspace, request).await
    }

    /// Compile stage. Returns `Some(outcome)` when the pipeline must stop.
    async fn compile(
        &self,
        descriptor: &ToolchainDescriptor,
        strategy: &CompileStrategy,
        workspace: &Workspace,
    ) -> Result<Option<ExecutionOutcome>, ExecError> {
        let vars = workspace.vars();
        let template = match strategy {
            CompileStrategy::SingleArtifact { command } => command,
            CompileStrategy::ProjectBuild {
                command, manifest, ..
            } => {
                if let Some(manifest) = manifest {
                    workspace.write_file(&manifest.file_name, &vars.expand(&manifest.contents))?;
                }
                command
            }
        };

        let (program, args) = vars
            .command(template)
            .ok_or_else(|| ExecError::EmptyCommand(descriptor.language.clone()))?;
        let invocation = Invocation {
            program,
            args,
            cwd: Some(workspace.dir().to_path_buf()),
            stdin: None,
            limits: self.settings.compile_timeout.map(|timeout| ResourceLimits {
                timeout,
                memory_bytes: None,
            }),
        };

        debug!(program = %invocation.program, "Compiling");
        let output = self.runner.run(&invocation).await?;

        match output.exit {
            ExitKind::TimedOut => {
                let limit = self.settings.compile_timeout.unwrap_or_default();
                Ok(Some(ExecutionOutcome::failed(Classification::timeout(limit))))
            }
            ExitKind::Exited(0) => {
                if let Some(artifact) = workspace.artifact_path() {
                    if !artifact.exists() {
                        return Err(ExecError::MissingArtifact(artifact.to_path_buf()));
                    }
                }
                debug!("Compiled");
                Ok(None)
            }
            ExitKind::Exited(exit_code) => {
                debug!(exit_code, "Compile failed");
                Ok(Some(ExecutionOutcome::from_parts(
                    Classification::CompileFailure { exit_code },
                    String::new(),
                    output.stderr,
                )))
            }
        }
    }

    /// Run stage, always under the resource governor.
    async fn run(
        &self,
        descriptor: &ToolchainDescriptor,
        workspace: &Workspace,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, ExecError> {
        let (program, args) = workspace
            .vars()
            .command(&descriptor.run)
            .ok_or_else(|| ExecError::EmptyCommand(descriptor.language.clone()))?;
        let limits = self.settings.run_limits.for_toolchain(descriptor);
        let invocation = Invocation {
            program,
            args,
            cwd: Some(workspace.dir().to_path_buf()),
            stdin: request.input_data.clone(),
            limits: Some(limits),
        };

        debug!(program = %invocation.program, "Running");
        let output = self.runner.run(&invocation).await?;

        Ok(match output.exit {
            ExitKind::TimedOut => {
                ExecutionOutcome::failed(Classification::timeout(limits.timeout))
            }
            ExitKind::Exited(code) => {
                ExecutionOutcome::from_parts(classify_run(code), output.stdout, output.stderr)
            }
        })
    }
}

fn internal_error(e: &ExecError) -> ExecutionOutcome {
    error!(error = %e, "Execution failed");
    ExecutionOutcome::failed(Classification::InternalError {
        message: e.to_string(),
    })
}
