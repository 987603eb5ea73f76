//! Shared test infrastructure for CLI integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const MOCK_SCRIPT: &str = r#"#!/bin/sh
dir=$(dirname "$0")
kind="$SKELGEN_REQUEST_KIND"
cat > "$dir/$kind.prompt"
case "$kind" in
  classify)
    cat "$dir/classify.txt"
    ;;
  generate)
    if [ -f "$dir/generate.fail" ]; then
      cat "$dir/generate.fail" >&2
      exit 3
    fi
    cat "$dir/generate.txt"
    ;;
  *)
    echo "unknown request kind: $kind" >&2
    exit 2
    ;;
esac
"#;

/// Mock LM backend: a shell script that replays canned answers per request kind
/// and keeps the last prompt it received for each kind.
pub struct MockLm {
    dir: TempDir,
}

impl MockLm {
    pub fn new(classify: &str, generate: &str) -> Self {
        let mock = Self::with_classify(classify);
        fs::write(mock.dir.path().join("generate.txt"), generate).expect("write generate answer");
        mock
    }

    /// Generation exits non-zero with `stderr` as its message.
    pub fn failing_generate(classify: &str, stderr: &str) -> Self {
        let mock = Self::with_classify(classify);
        fs::write(mock.dir.path().join("generate.fail"), stderr).expect("write failure");
        mock
    }

    fn with_classify(classify: &str) -> Self {
        let dir = TempDir::new().expect("create mock dir");
        let script = dir.path().join("mock-lm.sh");
        fs::write(&script, MOCK_SCRIPT).expect("write mock script");
        fs::write(dir.path().join("classify.txt"), classify).expect("write classify answer");
        Self { dir }
    }

    /// LM command line; run through `sh` so the script never needs exec permission.
    pub fn command(&self) -> String {
        let script = self.dir.path().join("mock-lm.sh");
        format!("sh {}", shell_words::quote(&script.to_string_lossy()))
    }

    /// Last prompt sent for `kind` (`classify` or `generate`), if any.
    pub fn prompt(&self, kind: &str) -> Option<String> {
        fs::read_to_string(self.dir.path().join(format!("{kind}.prompt"))).ok()
    }

    pub fn out_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn home(&self) -> &Path {
        self.dir.path()
    }
}

/// `skelgen` isolated from the caller's config, LM, and key settings.
pub fn skelgen(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_skelgen"));
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("SKELGEN_CONFIG")
        .env_remove("SKELGEN_LM_COMMAND")
        .env_remove("SKELGEN_API_KEY")
        .env_remove("API_KEY")
        .env_remove("RUST_LOG");
    cmd
}
