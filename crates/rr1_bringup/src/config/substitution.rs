//! Substitution engine for $(var), $(env), $(find-pkg-share), $(command) patterns

use crate::config::AmentIndex;
use regex::Regex;
use std::collections::HashMap;
use std::process::Command;
use std::sync::LazyLock;

/// Regex for the inside of a substitution: `type value` or `type`
static SUBSTITUTION_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*([\w-]+)(?:\s+(.*))?$").unwrap());

/// Substitution context containing all available variables
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    /// Launch configurations (declared arguments after overrides)
    pub args: HashMap<String, String>,
    /// Additional environment variables
    pub env: HashMap<String, String>,
    /// Package lookup for $(find-pkg-share)
    pub ament: AmentIndex,
    /// Leave $(command ...) and unknown packages unexpanded (plan rendering)
    pub defer_commands: bool,
}

impl SubstitutionContext {
    /// Create a new substitution context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a launch configuration
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Add multiple launch configurations
    pub fn with_args(mut self, args: HashMap<String, String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Add multiple environment variables
    pub fn with_envs<I>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(envs);
        self
    }

    pub fn with_ament(mut self, ament: AmentIndex) -> Self {
        self.ament = ament;
        self
    }

    /// Copy of this context that leaves $(command ...) in place
    pub fn deferring_commands(&self) -> Self {
        Self {
            defer_commands: true,
            ..self.clone()
        }
    }

    /// Expand every substitution in `input`, inner ones first.
    ///
    /// Results are not scanned again, except for launch configuration values
    /// which may themselves refer to other configurations.
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        self.substitute_at(input, 0)
    }

    fn substitute_at(&self, input: &str, depth: usize) -> Result<String, SubstitutionError> {
        const MAX_DEPTH: usize = 10;

        if depth > MAX_DEPTH {
            return Err(SubstitutionError::MaxDepthExceeded(input.to_string()));
        }

        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("$(") {
            output.push_str(&rest[..start]);
            let body = &rest[start + 2..];
            let Some(end) = closing_paren(body) else {
                // unbalanced, left as written
                output.push_str(&rest[start..]);
                return Ok(output);
            };
            let resolved = self.substitute_at(&body[..end], depth + 1)?;
            output.push_str(&self.expand(&resolved, depth)?);
            rest = &body[end + 1..];
        }
        output.push_str(rest);

        Ok(output)
    }

    /// Evaluate one `type value` body whose inner substitutions are resolved
    fn expand(&self, body: &str, depth: usize) -> Result<String, SubstitutionError> {
        let caps = SUBSTITUTION_BODY
            .captures(body)
            .ok_or_else(|| SubstitutionError::InvalidPattern(format!("$({})", body)))?;
        let kind = caps.get(1).map_or("", |m| m.as_str());
        let value = caps.get(2).map_or("", |m| m.as_str().trim());

        match kind {
            "var" | "arg" => match self.args.get(value) {
                Some(config) => self.substitute_at(config, depth + 1),
                None => Err(SubstitutionError::UndefinedArg(value.to_string())),
            },
            "env" => self.lookup_env(value),
            "find-pkg-share" => self.package_share(value),
            "command" if self.defer_commands => Ok(format!("$(command {})", value)),
            "command" => self.run_command(value),
            "timestamp" => Ok(format_now(value, "%Y%m%d_%H%M%S")),
            "date" => Ok(format_now(value, "%Y-%m-%d")),
            _ => Err(SubstitutionError::UnknownType(kind.to_string())),
        }
    }

    /// Description-level environment first, then the process environment
    fn lookup_env(&self, name: &str) -> Result<String, SubstitutionError> {
        match self.env.get(name) {
            Some(value) => Ok(value.clone()),
            None => std::env::var(name)
                .map_err(|_| SubstitutionError::UndefinedEnv(name.to_string())),
        }
    }

    fn package_share(&self, package: &str) -> Result<String, SubstitutionError> {
        match self.ament.package_share(package) {
            Some(path) => Ok(path.to_string_lossy().into_owned()),
            None if self.defer_commands => {
                log::warn!("Package '{}' not found, leaving it unresolved", package);
                Ok(format!("$(find-pkg-share {})", package))
            }
            None => Err(SubstitutionError::PackageNotFound(package.to_string())),
        }
    }

    /// Run `command` through `sh -c` and return its stdout without the trailing newline
    fn run_command(&self, command: &str) -> Result<String, SubstitutionError> {
        log::debug!("Running command substitution: {}", command);

        let failed = |reason: String| SubstitutionError::CommandFailed {
            command: command.to_string(),
            reason,
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(&self.env)
            .output()
            .map_err(|e| failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("{}: {}", output.status, stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

/// Offset of the `)` closing a substitution body, skipping balanced pairs
fn closing_paren(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => return Some(i),
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Local time in `format`, or in `default` when no format is given
fn format_now(format: &str, default: &str) -> String {
    let format = if format.is_empty() { default } else { format };
    chrono::Local::now().format(format).to_string()
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Undefined launch configuration: {0}")]
    UndefinedArg(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error("Package '{0}' not found. Ensure the package is installed and sourced.")]
    PackageNotFound(String),

    #[error("Command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),

    #[error("Maximum substitution depth exceeded for: {0}")]
    MaxDepthExceeded(String),
}
