use crate::context::{join_image_path, BuildContext};
use crate::spec::{
    BuildStep, CommandLine, ImageReference, ImageSpec, StepRole, NO_BYTECODE_FLAG,
    UNBUFFERED_FLAG,
};
use anyhow::Result;

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, spec: &ImageSpec, context: Option<&BuildContext>) -> Result<()>;
}

pub struct RequiredFieldsRule;

impl ValidationRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "RequiredFields"
    }

    fn validate(&self, spec: &ImageSpec, _context: Option<&BuildContext>) -> Result<()> {
        if spec.version.is_empty() {
            anyhow::bail!("Version cannot be empty");
        }
        if spec.base.trim().is_empty() {
            anyhow::bail!("Base image cannot be empty");
        }
        if spec.workdir.trim().is_empty() {
            anyhow::bail!("Working directory cannot be empty");
        }
        if spec.command.is_empty() {
            anyhow::bail!("Start command cannot be empty");
        }
        for (i, step) in spec.steps.iter().enumerate() {
            match step {
                BuildStep::Copy(copy) => {
                    if copy.sources.is_empty() || copy.sources.iter().any(|s| s.trim().is_empty())
                    {
                        anyhow::bail!("Step {} copy sources cannot be empty", i + 1);
                    }
                    if copy.dest.trim().is_empty() {
                        anyhow::bail!("Step {} copy destination cannot be empty", i + 1);
                    }
                }
                BuildStep::Run(run) => {
                    if run.command.is_empty() {
                        anyhow::bail!("Step {} run command cannot be empty", i + 1);
                    }
                }
            }
        }
        Ok(())
    }
}

pub struct ValidImageNameRule;

impl ValidationRule for ValidImageNameRule {
    fn name(&self) -> &'static str {
        "ValidImageName"
    }

    fn validate(&self, spec: &ImageSpec, _context: Option<&BuildContext>) -> Result<()> {
        ImageReference::parse(&spec.base)?;
        Ok(())
    }
}

pub struct AbsoluteWorkdirRule;

impl ValidationRule for AbsoluteWorkdirRule {
    fn name(&self) -> &'static str {
        "AbsoluteWorkdir"
    }

    fn validate(&self, spec: &ImageSpec, _context: Option<&BuildContext>) -> Result<()> {
        if !spec.workdir.starts_with('/') {
            anyhow::bail!("Working directory must be absolute, got '{}'", spec.workdir);
        }
        Ok(())
    }
}

/// Manifest copy, then install, then the full tree
///
/// Copying the tree before installing would tie the install layer's cache
/// key to every file in the application.
pub struct StepOrderRule;

impl ValidationRule for StepOrderRule {
    fn name(&self) -> &'static str {
        "StepOrder"
    }

    fn validate(&self, spec: &ImageSpec, _context: Option<&BuildContext>) -> Result<()> {
        let mut seen_manifest = false;
        let mut tree_step: Option<usize> = None;

        for (i, step) in spec.steps.iter().enumerate() {
            match step.role() {
                StepRole::Manifest => seen_manifest = true,
                StepRole::Tree => {
                    tree_step.get_or_insert(i + 1);
                }
                StepRole::Install => {
                    if let Some(tree) = tree_step {
                        anyhow::bail!(
                            "Install step {} comes after the full-tree copy at step {}",
                            i + 1,
                            tree
                        );
                    }
                    if !seen_manifest {
                        anyhow::bail!(
                            "Install step {} has no dependency manifest copied before it",
                            i + 1
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

pub struct EnvNamesRule;

impl ValidationRule for EnvNamesRule {
    fn name(&self) -> &'static str {
        "EnvNames"
    }

    fn validate(&self, spec: &ImageSpec, _context: Option<&BuildContext>) -> Result<()> {
        for name in spec.env.keys() {
            if name.is_empty() || name.contains('=') || name.contains(char::is_whitespace) {
                anyhow::bail!("Invalid environment variable name '{}'", name);
            }
        }
        Ok(())
    }
}

/// Python start commands must run without bytecode caches and unbuffered
pub struct RuntimeFlagsRule;

impl RuntimeFlagsRule {
    fn is_enabled(value: Option<&String>) -> bool {
        matches!(value.map(|v| v.trim()), Some(v) if !v.is_empty() && v != "0")
    }
}

impl ValidationRule for RuntimeFlagsRule {
    fn name(&self) -> &'static str {
        "RuntimeFlags"
    }

    fn validate(&self, spec: &ImageSpec, _context: Option<&BuildContext>) -> Result<()> {
        let is_python = spec
            .command
            .program_name()
            .map(|p| p.starts_with("python"))
            .unwrap_or(false);
        if !is_python {
            return Ok(());
        }

        for flag in [NO_BYTECODE_FLAG, UNBUFFERED_FLAG] {
            if !Self::is_enabled(spec.env.get(flag)) {
                anyhow::bail!("{} must be set for a python start command", flag);
            }
        }
        Ok(())
    }
}

/// The entry script must be one of the files the copy steps place
pub struct EntrypointExistsRule;

impl ValidationRule for EntrypointExistsRule {
    fn name(&self) -> &'static str {
        "EntrypointExists"
    }

    fn validate(&self, spec: &ImageSpec, context: Option<&BuildContext>) -> Result<()> {
        let (Some(context), Some(entry)) = (context, spec.entry_script()) else {
            return Ok(());
        };
        if let CommandLine::Exec(args) = &spec.command {
            // "-m module" and "-c code" name no file
            if args.get(1).map(|a| a.starts_with('-')).unwrap_or(false) {
                return Ok(());
            }
        }

        let target = join_image_path(&spec.workdir, entry);
        for copy in spec.copy_steps() {
            let placements = context.place(copy, &spec.workdir)?;
            if placements.iter().any(|p| p.target == target) {
                return Ok(());
            }
        }
        anyhow::bail!(
            "Entry script {} is not placed in the image by any copy step",
            target
        )
    }
}

pub struct CopySourcesRule;

impl ValidationRule for CopySourcesRule {
    fn name(&self) -> &'static str {
        "CopySources"
    }

    fn validate(&self, spec: &ImageSpec, context: Option<&BuildContext>) -> Result<()> {
        let Some(context) = context else {
            return Ok(());
        };
        for copy in spec.copy_steps() {
            for source in &copy.sources {
                context.select(source)?;
            }
        }
        Ok(())
    }
}
