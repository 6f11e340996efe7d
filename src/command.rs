//! Command lines supplied by users or derived from a manifest.
//!
//! User-supplied strings are split quote-aware and never handed to a shell,
//! so chaining and substitution syntax is refused outright. Install commands
//! additionally pass through a flag policy that rejects switches which mask
//! dependency problems instead of surfacing them.

use std::fmt::{Display, Formatter};

use crate::{AppError, Result};

/// Install flags that hide broken dependency trees. Rejected, never stripped.
pub const FORBIDDEN_INSTALL_FLAGS: &[&str] = &[
    "--legacy-peer-deps",
    "--force",
    "--ignore-engines",
    "--ignore-scripts",
    "--shamefully-hoist",
    "--skip-integrity-check",
    "--ignore-optional",
    "--ignore-platform",
    "--no-audit",
    "--no-shrinkwrap",
    "--frozen-lockfile=false",
    "--no-frozen-lockfile",
    "--no-immutable",
    "--unsafe-perm",
    "--prefer-offline",
];

/// Programs a user-supplied command may start unless configuration says otherwise.
pub const DEFAULT_ALLOWED_PROGRAMS: &[&str] = &[
    "npm", "npx", "pnpm", "yarn", "bun", "node", "tsc", "next", "turbo",
];

const SHELL_METACHARACTERS: &[&str] = &[";", "&&", "||", "`", "$(", "\n", "\r", "|", ">", "<"];

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
}

impl CommandLine {
    /// Build a command line from a program and borrowed arguments.
    #[must_use]
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    /// Parse a user-supplied command string.
    ///
    /// Single and double quotes group words; quotes themselves are removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the string is empty, has an
    /// unterminated quote, or contains shell chaining or substitution.
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(meta) = SHELL_METACHARACTERS.iter().find(|m| raw.contains(**m)) {
            return Err(AppError::Validation(format!(
                "command contains shell metacharacter `{}`: {raw}",
                meta.escape_debug()
            )));
        }

        let mut words = Vec::new();
        let mut current = String::new();
        let mut in_word = false;
        let mut quote: Option<char> = None;

        for ch in raw.chars() {
            match quote {
                Some(q) if ch == q => quote = None,
                Some(_) => current.push(ch),
                None if ch == '"' || ch == '\'' => {
                    quote = Some(ch);
                    in_word = true;
                }
                None if ch.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                None => {
                    current.push(ch);
                    in_word = true;
                }
            }
        }
        if quote.is_some() {
            return Err(AppError::Validation(format!(
                "unterminated quote in command: {raw}"
            )));
        }
        if in_word {
            words.push(current);
        }

        let mut words = words.into_iter();
        let program = words
            .next()
            .ok_or_else(|| AppError::Validation("command is empty".into()))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    /// Reject a program outside `allowed`.
    ///
    /// Matching ignores case, and a path whose last component is allowed
    /// (`/usr/local/bin/npm`, `C:\nodejs\npm`) passes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming the program and the allow-list.
    pub fn ensure_allowed_program<S: AsRef<str>>(&self, allowed: &[S]) -> Result<()> {
        let program = self.program.to_ascii_lowercase();
        let permitted = allowed.iter().any(|name| {
            let name = name.as_ref().to_ascii_lowercase();
            program == name
                || program.ends_with(&format!("/{name}"))
                || program.ends_with(&format!("\\{name}"))
        });
        if permitted {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "command `{}` is not in the allowed list: {}",
                self.program,
                allowed
                    .iter()
                    .map(AsRef::<str>::as_ref)
                    .collect::<Vec<&str>>()
                    .join(", ")
            )))
        }
    }

    /// Reject any forbidden install flag present in the arguments.
    ///
    /// Case is ignored and a flag embedded in a longer argument still counts,
    /// so `--FORCE` and `--legacy-peer-deps=true` are refused too.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming every offending flag.
    pub fn ensure_install_policy(&self) -> Result<()> {
        let lowered: Vec<String> = self.args.iter().map(|a| a.to_ascii_lowercase()).collect();
        let offending: Vec<&str> = FORBIDDEN_INSTALL_FLAGS
            .iter()
            .copied()
            .filter(|flag| lowered.iter().any(|arg| arg.contains(flag)))
            .collect();
        if offending.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "forbidden install flag(s): {}; fix the dependency tree instead",
                offending.join(", ")
            )))
        }
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}
