use crate::utils::binary_resolver;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;

/// An entry of `adb devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDevice {
    pub serial: String,
    pub state: String,
}

impl AdbDevice {
    /// Only `device` state is usable; `offline` and `unauthorized` are not.
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Parse the output of `adb devices` (header line skipped)
pub fn parse_devices(stdout: &str) -> Vec<AdbDevice> {
    stdout
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty() && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some(state)) => Some(AdbDevice {
                    serial: serial.to_string(),
                    state: state.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Get list of connected Android devices
pub async fn get_devices() -> Result<Vec<AdbDevice>> {
    let stdout = run(None, &["devices"]).await?;
    Ok(parse_devices(&stdout))
}

/// Execute an ADB shell command on one device
pub async fn shell(serial: &str, cmd: &str) -> Result<String> {
    run(Some(serial), &["shell", cmd])
        .await
        .with_context(|| format!("adb -s {} shell {}", serial, cmd))
}

/// Read a system property
pub async fn getprop(serial: &str, key: &str) -> Result<String> {
    let value = shell(serial, &format!("getprop {}", key)).await?;
    Ok(value.trim().to_string())
}

/// Execute ADB exec-out command and return raw binary data (screenshots)
pub async fn exec_out_binary(serial: &str, cmd: &str) -> Result<Vec<u8>> {
    let adb_path = binary_resolver::find_adb()?;
    let output = Command::new(adb_path)
        .args(["-s", serial, "exec-out", cmd])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to execute: adb exec-out {}", cmd))?;

    // exec-out may not set exit status properly, check if we got output
    if output.stdout.is_empty() && !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ADB exec-out command failed: {}", stderr);
    }

    Ok(output.stdout)
}

/// Execute a raw ADB command and return stdout
pub async fn run(serial: Option<&str>, args: &[&str]) -> Result<String> {
    let mut full_args = Vec::new();
    if let Some(s) = serial {
        full_args.push("-s");
        full_args.push(s);
    }
    full_args.extend_from_slice(args);

    let adb_path = binary_resolver::find_adb()?;
    let output = Command::new(adb_path)
        .args(&full_args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to execute: adb {:?}", full_args))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ADB command failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Extract `versionName=` from `dumpsys package <pkg>` output
pub fn parse_version_name(dumpsys: &str) -> Option<String> {
    dumpsys.lines().find_map(|line| {
        line.split_once("versionName=")
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Extract package names from `pm list packages` output
pub fn parse_packages(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(|p| p.trim().to_string())
        .collect()
}
