//! `quackgate doctor` - active health diagnostics.
//!
//! Probes the JSON-RPC endpoints and the deploy toolchain and validates
//! configuration, so problems surface before the first paid request.

use std::path::Path;

use crate::config::Config;
use crate::dispatch::Network;
use crate::policy::RpcPriceProbe;

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(strict: bool) -> anyhow::Result<()> {
    println!("Quackgate Doctor");
    println!("================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    check(
        "Env overlay",
        check_env_overlay(&crate::bootstrap::quackgate_env_path()),
        &mut passed,
        &mut failed,
    );

    let config = match Config::from_env() {
        Ok(config) => {
            check(
                "Configuration",
                CheckResult::Pass("all keys resolved".to_string()),
                &mut passed,
                &mut failed,
            );
            Some(config)
        }
        Err(e) => {
            check(
                "Configuration",
                CheckResult::Fail(e.to_string()),
                &mut passed,
                &mut failed,
            );
            None
        }
    };

    match &config {
        Some(config) => {
            let probe = RpcPriceProbe::new(config.rpc.clone());
            for network in [Network::Testnet, Network::Mainnet] {
                check(
                    &format!("RPC {network}"),
                    check_rpc(&probe, network, config.rpc.endpoint(network)).await,
                    &mut passed,
                    &mut failed,
                );
            }
            check(
                "Text-generation endpoint",
                check_llm_endpoint(&config.llm.api_url),
                &mut passed,
                &mut failed,
            );
            check(
                "Deploy workdir",
                check_deploy_workdir(&config.deploy.workdir, &config.deploy.deploy_script),
                &mut passed,
                &mut failed,
            );
            check(
                "Gateway bind address",
                check_bind_available(&config.gateway.host, config.gateway.port),
                &mut passed,
                &mut failed,
            );
        }
        None => {
            for name in [
                "RPC endpoints",
                "Text-generation endpoint",
                "Deploy workdir",
                "Gateway bind address",
            ] {
                check(
                    name,
                    CheckResult::Skip("configuration did not resolve".to_string()),
                    &mut passed,
                    &mut failed,
                );
            }
        }
    }

    // ── External binary checks ────────────────────────────────

    check(
        "sh",
        check_binary("sh", &["-c", "echo ok"]),
        &mut passed,
        &mut failed,
    );

    check(
        "npx",
        check_binary("npx", &["--version"]),
        &mut passed,
        &mut failed,
    );

    // ── Summary ───────────────────────────────────────────────

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Fix the failing checks before serving paid traffic.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

// ── Individual checks ───────────────────────────────────────

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

#[derive(Debug)]
enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_env_overlay(path: &Path) -> CheckResult {
    if path.is_file() {
        CheckResult::Pass(path.display().to_string())
    } else {
        CheckResult::Skip(format!("{} not present", path.display()))
    }
}

async fn check_rpc(probe: &RpcPriceProbe, network: Network, url: &str) -> CheckResult {
    match probe.probe_url(&format!("rpc-{network}"), url).await {
        Ok(wei) => CheckResult::Pass(format!("{url} gas price {wei} wei")),
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

fn check_llm_endpoint(api_url: &str) -> CheckResult {
    match url::Url::parse(api_url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => CheckResult::Pass(format!("host {host}")),
            None => CheckResult::Fail(format!("{api_url} has no host")),
        },
        Err(e) => CheckResult::Fail(format!("{api_url}: {e}")),
    }
}

fn check_deploy_workdir(workdir: &Path, deploy_script: &Path) -> CheckResult {
    if !workdir.is_dir() {
        return CheckResult::Fail(format!("{} is not a directory", workdir.display()));
    }
    let script = workdir.join(deploy_script);
    if !script.is_file() {
        return CheckResult::Fail(format!("deploy script {} missing", script.display()));
    }
    CheckResult::Pass(workdir.display().to_string())
}

fn check_bind_available(host: &str, port: u16) -> CheckResult {
    match std::net::TcpListener::bind((host, port)) {
        Ok(_) => CheckResult::Pass(format!("{host}:{port} is free")),
        Err(e) => CheckResult::Fail(format!("{host}:{port}: {e}")),
    }
}

fn check_binary(name: &str, args: &[&str]) -> CheckResult {
    match std::process::Command::new(name)
        .args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
    {
        Ok(output) => {
            let version = String::from_utf8_lossy(&output.stdout);
            let version = version.trim();
            let version = if version.is_empty() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                stderr.trim().lines().next().unwrap_or("").to_string()
            } else {
                version.lines().next().unwrap_or("").to_string()
            };

            if output.status.success() {
                CheckResult::Pass(version)
            } else {
                CheckResult::Fail(format!("exited with {}", output.status))
            }
        }
        Err(_) => CheckResult::Skip(format!("{name} not found in PATH")),
    }
}
