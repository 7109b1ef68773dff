//! Scripted `zfs` stand-in for unit tests
//!
//! The script records every invocation as `[arg][arg]...` lines in
//! `$FAKE_ZFS_STATE/calls`. Per subcommand it can be told to fail
//! (`<sub>.fail` holds the stderr text) or to print canned output
//! (`<sub>.stdout`), and to stall first (`<sub>.sleep` holds seconds). `send` emits a marker stream and `receive` stores its
//! stdin in `received`.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;

use crate::command::{CommandExecutor, ExecutorConfig};

const SCRIPT: &str = r#"#!/bin/sh
state="$FAKE_ZFS_STATE"
line=""
for a in "$@"; do line="$line[$a]"; done
printf '%s\n' "$line" >> "$state/calls"
if [ -f "$state/$1.sleep" ]; then
    sleep "$(cat "$state/$1.sleep")"
fi
if [ -f "$state/$1.fail" ]; then
    cat "$state/$1.fail" >&2
    exit 1
fi
case "$1" in
    send) printf 'STREAM'; for a in "$@"; do printf '[%s]' "$a"; done ;;
    receive) cat > "$state/received" ;;
esac
if [ -f "$state/$1.stdout" ]; then
    cat "$state/$1.stdout"
fi
exit 0
"#;

fn script_path() -> &'static Path {
    static SCRIPT_DIR: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = SCRIPT_DIR.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zfs");
        std::fs::write(&path, SCRIPT).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        // children forked by parallel tests may still hold the write fd (ETXTBSY)
        std::thread::sleep(std::time::Duration::from_millis(100));
        (dir, path)
    });
    path
}

/// One isolated fake engine
pub struct FakeZfs {
    state: TempDir,
}

impl FakeZfs {
    pub fn new() -> Self {
        Self {
            state: TempDir::new().unwrap(),
        }
    }

    pub fn config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig {
            zfs_path: script_path().to_path_buf(),
            ..Default::default()
        };
        config.env.insert(
            "FAKE_ZFS_STATE".to_string(),
            self.state.path().to_string_lossy().to_string(),
        );
        config
    }

    pub fn executor(&self) -> Arc<CommandExecutor> {
        Arc::new(CommandExecutor::new(self.config()))
    }

    /// Make `zfs <sub>` exit 1 with `stderr`
    pub fn fail(&self, sub: &str, stderr: &str) {
        std::fs::write(self.state.path().join(format!("{}.fail", sub)), stderr).unwrap();
    }

    /// Let `zfs <sub>` succeed again
    pub fn clear_failure(&self, sub: &str) {
        let _ = std::fs::remove_file(self.state.path().join(format!("{}.fail", sub)));
    }

    /// Make `zfs <sub>` sleep `secs` before doing anything else
    pub fn delay(&self, sub: &str, secs: u32) {
        std::fs::write(self.state.path().join(format!("{}.sleep", sub)), secs.to_string()).unwrap();
    }

    /// Make `zfs <sub>` print `stdout`
    pub fn respond(&self, sub: &str, stdout: &str) {
        std::fs::write(self.state.path().join(format!("{}.stdout", sub)), stdout).unwrap();
    }

    /// Recorded invocations, one `[arg]...` string each
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.state.path().join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn last_call(&self) -> String {
        self.calls().pop().unwrap_or_default()
    }

    pub fn received(&self) -> Option<String> {
        std::fs::read_to_string(self.state.path().join("received")).ok()
    }
}

/// Render an argv the way the script records it
pub fn argv(args: &[&str]) -> String {
    args.iter().map(|a| format!("[{}]", a)).collect()
}
