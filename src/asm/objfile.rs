//! Object-file format for Duck Machine programs.
//!
//! A simple text format:
//! - One 32-bit word per line, as 8 hex digits
//! - Anything after a `;` is a comment
//! - Blank lines are ignored

use crate::asm::disasm::disassemble_word;
use crate::cpu::Word;
use std::io::{BufRead, BufReader, Write as _};
use std::path::Path;
use thiserror::Error;

/// A loaded object file.
#[derive(Debug, Clone)]
pub struct ObjFile {
    /// The program words.
    pub words: Vec<Word>,
    /// Original source lines (for debugging).
    pub source_lines: Vec<String>,
}

impl ObjFile {
    /// Create a new empty object file.
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            source_lines: Vec::new(),
        }
    }

    /// Add a word.
    pub fn push(&mut self, word: Word, source: &str) {
        self.words.push(word);
        self.source_lines.push(source.to_string());
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for ObjFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Load an object file from disk.
pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<ObjFile, ObjError> {
    let file = std::fs::File::open(path.as_ref()).map_err(|e| ObjError::IoError(e.to_string()))?;
    let reader = BufReader::new(file);

    let mut obj = ObjFile::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| ObjError::IoError(e.to_string()))?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }

        let hex = trimmed.split(';').next().unwrap_or("").trim();
        let word = u32::from_str_radix(hex, 16).map_err(|_| ObjError::ParseError {
            line: line_num + 1,
            message: format!("expected 8 hex digits, found '{}'", hex),
        })?;

        obj.push(word as Word, trimmed);
    }

    Ok(obj)
}

/// Save an object file to disk, annotated with a disassembly.
pub fn save_obj<P: AsRef<Path>>(path: P, obj: &ObjFile) -> Result<(), ObjError> {
    let mut file = std::fs::File::create(path.as_ref()).map_err(|e| ObjError::IoError(e.to_string()))?;

    writeln!(file, "; Duck Machine object file").map_err(|e| ObjError::IoError(e.to_string()))?;
    writeln!(file, "; {} words", obj.len()).map_err(|e| ObjError::IoError(e.to_string()))?;
    writeln!(file).map_err(|e| ObjError::IoError(e.to_string()))?;

    for (addr, word) in obj.words.iter().enumerate() {
        writeln!(file, "{:08X} ; {:03}: {}", *word as u32, addr, disassemble_word(*word))
            .map_err(|e| ObjError::IoError(e.to_string()))?;
    }

    Ok(())
}

/// Save bare words directly as an object file.
pub fn save_words<P: AsRef<Path>>(path: P, words: &[Word]) -> Result<(), ObjError> {
    let obj = ObjFile {
        words: words.to_vec(),
        source_lines: words.iter().map(|w| disassemble_word(*w)).collect(),
    };
    save_obj(path, &obj)
}

/// Errors that can occur during object-file operations.
#[derive(Debug, Clone, Error)]
pub enum ObjError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;

    #[test]
    fn test_objfile_push() {
        let mut obj = ObjFile::new();
        obj.push(0, "HALT");
        obj.push(42, "DATA");

        assert_eq!(obj.len(), 2);
        assert!(!obj.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let words = assemble(
            r#"
            ADD r1,r0,r0[5]
            STORE r1,r0,r0[9]
            HALT
        "#,
        )
        .unwrap();

        let path = std::env::temp_dir().join("duck-objfile-roundtrip.obj");
        save_words(&path, &words).unwrap();
        let loaded = load_obj(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.words, words);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let path = std::env::temp_dir().join("duck-objfile-garbage.obj");
        std::fs::write(&path, "; header\nnot-hex\n").unwrap();
        let result = load_obj(&path);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(ObjError::ParseError { line: 2, .. })));
    }
}
