use thiserror::Error;

/// Failure reading the raw microcode buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramError {
    pub word_index: usize,
    pub message: String,
}

impl std::fmt::Display for ProgramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GPU7 program error at word {}: {}",
            self.word_index, self.message
        )
    }
}

impl std::error::Error for ProgramError {}

/// Fatal compile failures. Any of these aborts the whole compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("structural decode error at word {word_index}: {message}")]
    StructuralDecode { word_index: usize, message: String },

    #[error("unresolved reference at offset {offset:#x}: {message}")]
    UnresolvedReference { offset: u32, message: String },

    #[error("assumption violated at word {word_index}: {message}")]
    AssumptionViolation { word_index: usize, message: String },
}

impl CompileError {
    pub(crate) fn structural(word_index: usize, message: impl Into<String>) -> Self {
        Self::StructuralDecode {
            word_index,
            message: message.into(),
        }
    }

    pub(crate) fn unresolved(offset: u32, message: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            offset,
            message: message.into(),
        }
    }
}

impl From<ProgramError> for CompileError {
    fn from(err: ProgramError) -> Self {
        Self::StructuralDecode {
            word_index: err.word_index,
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Recognized but unimplemented instruction form.
    UnsupportedInstruction,
    /// A field expected to be fixed by hardware convention held an unexpected value.
    AssumptionViolation,
}

/// Non-fatal problem recorded during a compile. Any diagnostic marks the shader erroneous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Word index into the program, when the problem is tied to one.
    pub word_index: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            DiagnosticKind::UnsupportedInstruction => "unsupported",
            DiagnosticKind::AssumptionViolation => "assumption",
        };
        match self.word_index {
            Some(word_index) => write!(f, "{kind} (word {word_index}): {}", self.message),
            None => write!(f, "{kind}: {}", self.message),
        }
    }
}

/// Accumulates non-fatal diagnostics for one compile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unsupported(&mut self, word_index: Option<usize>, message: impl Into<String>) {
        self.push(DiagnosticKind::UnsupportedInstruction, word_index, message.into());
    }

    pub fn assumption(&mut self, word_index: Option<usize>, message: impl Into<String>) {
        self.push(DiagnosticKind::AssumptionViolation, word_index, message.into());
    }

    fn push(&mut self, kind: DiagnosticKind, word_index: Option<usize>, message: String) {
        tracing::warn!(?kind, ?word_index, %message, "shader diagnostic");
        self.entries.push(Diagnostic {
            kind,
            word_index,
            message,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends entries not already recorded. Both dialects report the same constructs.
    pub fn extend(&mut self, other: Diagnostics) {
        for entry in other.entries {
            if !self.entries.contains(&entry) {
                self.entries.push(entry);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_error_converts_to_structural() {
        let err = ProgramError {
            word_index: 7,
            message: "out of bounds".to_string(),
        };
        assert_eq!(
            CompileError::from(err),
            CompileError::StructuralDecode {
                word_index: 7,
                message: "out of bounds".to_string()
            }
        );
    }

    #[test]
    fn diagnostics_display_kind_and_location() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.unsupported(Some(12), "op2 0x7ff");
        diagnostics.assumption(None, "pred_sel set");
        let text: Vec<String> = diagnostics.iter().map(ToString::to_string).collect();
        assert_eq!(
            text,
            vec![
                "unsupported (word 12): op2 0x7ff".to_string(),
                "assumption: pred_sel set".to_string()
            ]
        );
    }
}
