use anyhow::Result;
use std::path::{Path, PathBuf};

/// Install directory shared with lumi-tester (`~/.lumi-tester`)
fn install_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lumi-tester"))
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Find a binary: explicit override first, then well-known install locations,
/// then the system PATH.
pub fn find_binary(name: &str, override_path: Option<&Path>, known: &[PathBuf]) -> Result<PathBuf> {
    let mut checked_paths = Vec::new();

    if let Some(path) = override_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        checked_paths.push(format!("Configured: {:?}", path));
    }

    for candidate in known {
        checked_paths.push(format!("Install Dir: {:?}", candidate));
        if candidate.exists() {
            return Ok(candidate.clone());
        }
    }

    if let Ok(path) = which::which(exe_name(name)) {
        return Ok(path);
    }
    checked_paths.push("System PATH".to_string());

    Err(anyhow::anyhow!(
        "Could not find binary '{}'. Checked paths:\n{}",
        name,
        checked_paths.join("\n")
    ))
}

/// Find ADB binary (`~/.lumi-tester/platform-tools/adb`, `$ANDROID_HOME/platform-tools/adb`, PATH)
pub fn find_adb() -> Result<PathBuf> {
    let mut known = Vec::new();
    if let Some(dir) = install_dir() {
        known.push(dir.join("platform-tools").join(exe_name("adb")));
    }
    if let Ok(sdk) = std::env::var("ANDROID_HOME") {
        known.push(PathBuf::from(sdk).join("platform-tools").join(exe_name("adb")));
    }
    find_binary("adb", None, &known)
}

/// Find the Maestro CLI (`~/.maestro/bin/maestro`, PATH)
pub fn find_maestro(override_path: Option<&Path>) -> Result<PathBuf> {
    let mut known = Vec::new();
    if let Some(home) = dirs::home_dir() {
        known.push(home.join(".maestro").join("bin").join(exe_name("maestro")));
    }
    find_binary("maestro", override_path, &known)
}

/// Find mitmdump (`~/.lumi-tester/mitmproxy/mitmdump`, PATH)
pub fn find_mitmdump(override_path: Option<&Path>) -> Result<PathBuf> {
    let mut known = Vec::new();
    if let Some(dir) = install_dir() {
        known.push(dir.join("mitmproxy").join(exe_name("mitmdump")));
    }
    find_binary("mitmdump", override_path, &known)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("maestro");
        std::fs::write(&fake, "#!/bin/sh\n").unwrap();
        assert_eq!(find_maestro(Some(&fake)).unwrap(), fake);
    }

    #[test]
    fn test_missing_binary_lists_checked_paths() {
        let missing = PathBuf::from("/nonexistent/lumi-rail/tool");
        let err = find_binary("lumi-rail-no-such-tool", Some(&missing), &[]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("lumi-rail-no-such-tool"));
        assert!(msg.contains("/nonexistent/lumi-rail/tool"));
    }
}
