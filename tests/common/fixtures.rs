//! Test fixtures: a fake aligner wrapper and staged sequence files

use super::constants::{PAF_LINE, WRAPPER_ARGS_FILE};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Behaviour of the fake wrapper, passed to it as the aligner path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperMode {
    /// Writes one alignment to `map.paf`
    Align,
    /// Exits 0 with an empty `map.paf`
    NoMatch,
    /// Exits 0 without writing `map.paf`
    NoOutput,
    /// Exits 1 after a memory exhaustion message
    OutOfMemory,
    /// Exits 2 with an unrecognized message
    Crash,
    /// Sleeps longer than the test timeouts
    Hang,
}

impl WrapperMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            WrapperMode::Align => "align",
            WrapperMode::NoMatch => "nomatch",
            WrapperMode::NoOutput => "nooutput",
            WrapperMode::OutOfMemory => "oom",
            WrapperMode::Crash => "crash",
            WrapperMode::Hang => "hang",
        }
    }
}

/// Write the fake wrapper script into `dir` and make it executable.
///
/// Arguments follow the real wrapper: aligner, threads, target, query,
/// paf, raw paf.
pub fn create_fake_wrapper(dir: &Path) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
echo "$@" > "$(dirname "$5")/{args_file}"
case "$1" in
  align)
    printf '{paf}\n' > "$5"
    printf '{paf}\n' > "$6"
    ;;
  nomatch)
    : > "$5"
    ;;
  nooutput)
    ;;
  oom)
    echo "[M::mm_idx_gen] reading target" >&2
    echo "[morecore] insufficient memory" >&2
    exit 1
    ;;
  crash)
    echo "something went wrong" >&2
    exit 2
    ;;
  hang)
    sleep 30
    ;;
esac
"#,
        args_file = WRAPPER_ARGS_FILE,
        paf = PAF_LINE,
    );

    let path = dir.join("run_minimap2.sh");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Stage `contents` as `name` in `dir`, the way an upload lands before launch.
pub fn stage_sequence(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
