//! Daemon management commands
//!
//! Provides the `onemount daemon` CLI subcommands for controlling the
//! OneMount background synchronization service via systemd user units.
//!
//! # Subcommands
//!
//! - `start`   - Start the daemon service
//! - `stop`    - Stop the daemon service
//! - `status`  - Show daemon status
//! - `restart` - Restart the daemon service

use std::process::Command;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use crate::output::{get_formatter, OutputFormat};

/// Service unit name for the OneMount daemon
const SYSTEMD_UNIT: &str = "onemount";

// ============================================================================
// T226: DaemonCommand with subcommands
// ============================================================================

/// Manage the OneMount background daemon
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the OneMount daemon
    Start,
    /// Stop the OneMount daemon
    Stop,
    /// Show daemon status
    Status,
    /// Restart the OneMount daemon
    Restart,
}

impl DaemonCommand {
    /// Execute the selected daemon subcommand
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        match self {
            DaemonCommand::Start => daemon_start(format),
            DaemonCommand::Stop => daemon_stop(format),
            DaemonCommand::Status => daemon_status(format),
            DaemonCommand::Restart => daemon_restart(format),
        }
    }
}

// ============================================================================
// T227: daemon start
// ============================================================================

/// Starts the OneMount daemon via systemctl
///
/// Runs `systemctl --user start onemount` and reports the result.
fn daemon_start(format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));

    info!("Starting OneMount daemon via systemctl");

    let output = Command::new("systemctl")
        .args(["--user", "start", SYSTEMD_UNIT])
        .output()
        .context("Failed to execute systemctl. Is systemd available?")?;

    if output.status.success() {
        formatter.success("OneMount daemon started");
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "start",
                "success": true,
            }));
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let msg = format!("Failed to start daemon: {}", stderr.trim());
        formatter.error(&msg);

        if stderr.contains("not found") || stderr.contains("No such file") {
            formatter.info("Hint: The systemd unit file may not be installed.");
            formatter
                .info("Copy config/onemount.service to ~/.config/systemd/user/onemount.service");
            formatter.info("Then run: systemctl --user daemon-reload");
        }

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "start",
                "success": false,
                "error": stderr.trim(),
            }));
        }
    }

    Ok(())
}

// ============================================================================
// T228: daemon stop
// ============================================================================

/// Stops the OneMount daemon via systemctl
///
/// Runs `systemctl --user stop onemount` and reports the result.
fn daemon_stop(format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));

    info!("Stopping OneMount daemon via systemctl");

    let output = Command::new("systemctl")
        .args(["--user", "stop", SYSTEMD_UNIT])
        .output()
        .context("Failed to execute systemctl. Is systemd available?")?;

    if output.status.success() {
        formatter.success("OneMount daemon stopped");
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "stop",
                "success": true,
            }));
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        formatter.error(&format!("Failed to stop daemon: {}", stderr.trim()));

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "stop",
                "success": false,
                "error": stderr.trim(),
            }));
        }
    }

    Ok(())
}

// ============================================================================
// T229: daemon status
// ============================================================================

/// Shows the OneMount daemon status
///
/// Runs `systemctl --user status onemount` and displays the output.
fn daemon_status(format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));

    info!("Querying OneMount daemon status via systemctl");

    let output = Command::new("systemctl")
        .args(["--user", "status", SYSTEMD_UNIT])
        .output()
        .context("Failed to execute systemctl. Is systemd available?")?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    // Parse some basic info from systemctl output
    let is_active = stdout.contains("active (running)");
    let is_inactive = stdout.contains("inactive (dead)");
    let is_failed = stdout.contains("failed");

    let status_str = if is_active {
        "running"
    } else if is_failed {
        "failed"
    } else if is_inactive {
        "stopped"
    } else {
        "unknown"
    };

    if matches!(format, OutputFormat::Json) {
        formatter.print_json(&serde_json::json!({
            "action": "status",
            "status": status_str,
            "active": is_active,
            "details": stdout.trim(),
        }));
        return Ok(());
    }

    // Human-readable output
    if is_active {
        formatter.success("OneMount daemon is running");
    } else if is_failed {
        formatter.error("OneMount daemon has failed");
    } else if is_inactive {
        formatter.info("OneMount daemon is stopped");
    } else {
        formatter.info("OneMount daemon status is unknown");
    }

    // Show full systemctl output for details
    if !stdout.is_empty() {
        formatter.info("");
        for line in stdout.lines() {
            formatter.info(line);
        }
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() && !output.status.success() {
        // systemctl status exits with non-zero for inactive services, so
        // only show stderr if it contains meaningful error text
        if stderr.contains("not found") || stderr.contains("No such file") {
            formatter.info("");
            formatter.info("Hint: The systemd unit file may not be installed.");
            formatter
                .info("Copy config/onemount.service to ~/.config/systemd/user/onemount.service");
            formatter.info("Then run: systemctl --user daemon-reload");
        }
    }

    Ok(())
}

// ============================================================================
// T230: daemon restart
// ============================================================================

/// Restarts the OneMount daemon via systemctl
///
/// Runs `systemctl --user restart onemount` and reports the result.
fn daemon_restart(format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));

    info!("Restarting OneMount daemon via systemctl");

    let output = Command::new("systemctl")
        .args(["--user", "restart", SYSTEMD_UNIT])
        .output()
        .context("Failed to execute systemctl. Is systemd available?")?;

    if output.status.success() {
        formatter.success("OneMount daemon restarted");
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "restart",
                "success": true,
            }));
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        formatter.error(&format!("Failed to restart daemon: {}", stderr.trim()));

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "restart",
                "success": false,
                "error": stderr.trim(),
            }));
        }
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
