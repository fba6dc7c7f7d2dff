use std::fs::OpenOptions;
use std::path::Path;

use hubwire_driver::DriverConfig;
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

/// Fails only when neither link can work; a missing I2C bus is fine on a
/// serial-only setup and the other way round.
pub fn run(_args: DoctorArgs, config: &DriverConfig, format: OutputFormat) -> CliResult<i32> {
    let serial = device_check("serial_device", &config.serial.device);
    let i2c = i2c_check(config);
    let wake = wake_line_check(config);

    let usable = matches!(serial.status, CheckStatus::Pass)
        || (matches!(i2c.status, CheckStatus::Pass) && matches!(wake.status, CheckStatus::Pass));

    let checks = vec![
        platform_check(),
        config_check(config),
        serial,
        i2c,
        wake,
    ];
    let overall = if usable { "pass" } else { "fail" };
    print_doctor(&DoctorOutput { checks, overall }, format);

    if usable {
        Ok(SUCCESS)
    } else {
        Ok(HEALTH_CHECK_FAILED)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let mut t = table(vec!["CHECK", "STATUS", "DETAIL"]);
            for c in &output.checks {
                t.add_row(vec![
                    c.name.to_string(),
                    status_text(c.status).to_string(),
                    c.detail.clone(),
                ]);
            }
            println!("{t}");
            println!("Result: {}", output.overall);
        }
        OutputFormat::Pretty => {
            println!("hubwire doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<16} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: a link to the Hub is available");
            } else {
                println!("\n  Result: no usable link to the Hub");
            }
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn platform_check() -> CheckResult {
    CheckResult::new(
        "platform",
        CheckStatus::Info,
        format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
    )
}

fn config_check(config: &DriverConfig) -> CheckResult {
    match config.validate() {
        Ok(()) => CheckResult::new(
            "config",
            CheckStatus::Pass,
            format!(
                "reply {:?}, long {:?}, {} ports",
                config.reply_timeout, config.long_operation_timeout, config.port_count
            ),
        ),
        Err(err) => CheckResult::new("config", CheckStatus::Fail, err.to_string()),
    }
}

/// The node exists and can be opened read-write by this user.
fn device_check(name: &'static str, path: &Path) -> CheckResult {
    if !path.exists() {
        return CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("{} does not exist", path.display()),
        );
    }
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(_) => CheckResult::new(
            name,
            CheckStatus::Pass,
            format!("{} is accessible", path.display()),
        ),
        Err(err) => CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("{}: {err}", path.display()),
        ),
    }
}

fn i2c_check(config: &DriverConfig) -> CheckResult {
    if cfg!(target_os = "linux") {
        let mut check = device_check("i2c_device", &config.i2c.device);
        if matches!(check.status, CheckStatus::Pass) {
            check.detail = format!("{} (address {:#04x})", check.detail, config.i2c.address);
        }
        check
    } else {
        CheckResult::new(
            "i2c_device",
            CheckStatus::Skip,
            "I2C link is only available on Linux",
        )
    }
}

fn wake_line_check(config: &DriverConfig) -> CheckResult {
    if !cfg!(target_os = "linux") {
        return CheckResult::new("wake_gpio", CheckStatus::Skip, "sysfs GPIO is Linux only");
    }
    let root = &config.i2c.sysfs_root;
    let gpio = config.i2c.wake_gpio;
    let exported = root.join(format!("gpio{gpio}"));
    if exported.join("value").exists() {
        CheckResult::new(
            "wake_gpio",
            CheckStatus::Pass,
            format!("gpio{gpio} exported under {}", root.display()),
        )
    } else if root.join("export").exists() {
        CheckResult::new(
            "wake_gpio",
            CheckStatus::Warn,
            format!("gpio{gpio} not exported yet; it will be on open"),
        )
    } else {
        CheckResult::new(
            "wake_gpio",
            CheckStatus::Fail,
            format!("{} has no GPIO export interface", root.display()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "hubwire-doctor-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn missing_device_fails() {
        let check = device_check("serial_device", Path::new("/nonexistent/hubwire-tty"));
        assert!(matches!(check.status, CheckStatus::Fail));
        assert!(check.detail.contains("does not exist"));
    }

    #[test]
    fn writable_file_passes_device_check() {
        let dir = temp_dir("device");
        let node = dir.join("tty");
        std::fs::write(&node, b"").unwrap();
        let check = device_check("serial_device", &node);
        assert!(matches!(check.status, CheckStatus::Pass));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn wake_line_reports_export_state() {
        let dir = temp_dir("gpio");
        let mut config = DriverConfig::default();
        config.i2c.sysfs_root = dir.clone();
        config.i2c.wake_gpio = 5;

        assert!(matches!(wake_line_check(&config).status, CheckStatus::Fail));

        std::fs::write(dir.join("export"), b"").unwrap();
        assert!(matches!(wake_line_check(&config).status, CheckStatus::Warn));

        std::fs::create_dir_all(dir.join("gpio5")).unwrap();
        std::fs::write(dir.join("gpio5").join("value"), b"0\n").unwrap();
        assert!(matches!(wake_line_check(&config).status, CheckStatus::Pass));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalid_config_fails_config_check() {
        let config = DriverConfig {
            port_count: 0,
            ..DriverConfig::default()
        };
        assert!(matches!(config_check(&config).status, CheckStatus::Fail));
    }
}
