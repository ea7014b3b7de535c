//! Deliberately broken scripts for trying the fixer out.

use std::path::{Path, PathBuf};

/// A named sample script.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub filename: &'static str,
    pub description: &'static str,
    pub source: &'static str,
}

pub const SAMPLES: [Sample; 3] = [
    Sample {
        filename: "test_import_error.py",
        description: "imports a module that does not exist",
        source: "import nonexistent_module\nprint(\"This won't work\")\n",
    },
    Sample {
        filename: "test_syntax_error.py",
        description: "missing closing parenthesis",
        source: "print(\"Hello World\"  # Missing closing parenthesis\nx = 5\nprint(f\"Value: {x}\")\n",
    },
    Sample {
        filename: "test_variable_error.py",
        description: "uses an undefined variable",
        source: "x = 5\ny = 10\nprint(f\"Sum: {x + z}\")  # z is not defined\n",
    },
];

/// Write every sample into `dir`, creating it if needed.
pub fn write_samples(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    SAMPLES
        .iter()
        .map(|sample| {
            let path = dir.join(sample.filename);
            std::fs::write(&path, sample.source)?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_all_samples() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("samples");
        let paths = write_samples(&out).unwrap();

        assert_eq!(paths.len(), SAMPLES.len());
        for (path, sample) in paths.iter().zip(SAMPLES.iter()) {
            assert!(path.ends_with(sample.filename));
            assert_eq!(std::fs::read_to_string(path).unwrap(), sample.source);
        }
    }

    #[test]
    fn samples_are_python_files() {
        assert!(SAMPLES.iter().all(|s| s.filename.ends_with(".py")));
    }
}
