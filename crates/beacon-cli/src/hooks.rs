//! Shell hooks standing in for platform services (SMS, calls, location, OCR).
//!
//! Each hook is run through `sh -c`. Arguments are passed as environment
//! variables (`BEACON_TO`, `BEACON_BODY`) and never spliced into the command.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use beacon_assist::driver::{Haptics, TextReader};
use beacon_assist::emergency::{GeoPoint, Telephony};

fn run_hook(name: &str, script: &str, env: &[(&str, &str)]) -> Result<String> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    for (k, v) in env {
        cmd.env(k, v);
    }
    debug!("hook {}: {}", name, script);
    let out = cmd.output().with_context(|| format!("run {} hook", name))?;
    anyhow::ensure!(
        out.status.success(),
        "{} hook failed ({}): {}",
        name,
        out.status,
        String::from_utf8_lossy(&out.stderr).trim()
    );
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// "lat,lon" as printed by the location hook.
pub fn parse_location(s: &str) -> Option<GeoPoint> {
    let (lat, lon) = s.trim().split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some(GeoPoint { lat, lon })
}

#[derive(Debug, Clone, Default)]
pub struct ShellTelephony {
    pub sms_command: Option<String>,
    pub call_command: Option<String>,
    pub location_command: Option<String>,
}

impl Telephony for ShellTelephony {
    fn last_known_location(&self) -> Option<GeoPoint> {
        let script = self.location_command.as_ref()?;
        match run_hook("location", script, &[]) {
            Ok(out) => parse_location(&out),
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        }
    }

    fn send_sms(&self, to: &str, body: &str) -> Result<()> {
        let script = self.sms_command.as_ref().context("emergency.sms_command not configured")?;
        run_hook("sms", script, &[("BEACON_TO", to), ("BEACON_BODY", body)]).map(|_| ())
    }

    fn call(&self, to: &str) -> Result<()> {
        anyhow::ensure!(!to.is_empty(), "emergency.contact_number not configured");
        let script = self.call_command.as_ref().context("emergency.call_command not configured")?;
        run_hook("call", script, &[("BEACON_TO", to)]).map(|_| ())
    }
}

pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn vibrate(&mut self, duration: Duration) {
        info!("haptic: vibrate {} ms", duration.as_millis());
    }
}

pub struct CommandReader {
    pub command: Option<String>,
}

impl TextReader for CommandReader {
    fn start(&mut self) -> Result<()> {
        let script = self.command.clone().context("reader.command not configured")?;
        // OCR runs for a while; do not hold up the session task
        std::thread::spawn(move || match run_hook("reader", &script, &[]) {
            Ok(_) => info!("reader: finished"),
            Err(e) => warn!("{:#}", e),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_parsing() {
        assert_eq!(parse_location(" 17.4, 78.5\n"), Some(GeoPoint { lat: 17.4, lon: 78.5 }));
        assert_eq!(parse_location("unknown"), None);
        assert_eq!(parse_location("95.0,10.0"), None);
    }

    #[test]
    fn hooks_receive_arguments_through_env() {
        let t = ShellTelephony {
            sms_command: Some(r#"test "$BEACON_TO" = 112 && test -n "$BEACON_BODY""#.into()),
            call_command: Some("exit 3".into()),
            location_command: Some("echo 12.5,77.25".into()),
        };
        assert_eq!(t.last_known_location(), Some(GeoPoint { lat: 12.5, lon: 77.25 }));
        t.send_sms("112", "EMERGENCY! x; rm -rf /").unwrap();
        assert!(t.call("112").is_err());
    }

    #[test]
    fn missing_hooks_are_errors() {
        let t = ShellTelephony::default();
        assert!(t.last_known_location().is_none());
        assert!(t.send_sms("112", "x").is_err());
        assert!(t.call("112").is_err());
        assert!(CommandReader { command: None }.start().is_err());
    }
}
