// systemd unit files and service manager control
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt::Write as _;
use std::thread;
use std::time::Duration;

use crate::host::{HostError, HostMemoryState};
use crate::{info, warn};

/// A command line for `ExecStart=`/`ExecStop=`, kept as separate words
/// until rendering so each one is quoted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecLine {
    program: String,
    args: Vec<String>,
}

impl ExecLine {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|w| quote(w))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote one word for a unit file command line.
/// `%` and `$` are doubled so systemd passes them through literally.
fn quote(word: &str) -> String {
    let escaped = word.replace('%', "%%").replace('$', "$$");
    let plain = !escaped.is_empty()
        && !escaped
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if plain {
        escaped
    } else {
        format!("\"{}\"", escaped.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Exec(ExecLine),
}

/// An ordered, typed unit file
#[derive(Debug, Clone, Default)]
pub struct UnitFile {
    sections: Vec<(String, Vec<(String, Value)>)>,
}

impl UnitFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, name: &str) -> Self {
        self.sections.push((name.to_string(), Vec::new()));
        self
    }

    /// Add `key=value` to the last section. Newlines are not allowed in values.
    pub fn entry(mut self, key: &str, value: impl Into<String>) -> Self {
        let value: String = value.into();
        self.push(key, Value::Text(value.replace('\n', " ")));
        self
    }

    pub fn exec(mut self, key: &str, line: ExecLine) -> Self {
        self.push(key, Value::Exec(line));
        self
    }

    fn push(&mut self, key: &str, value: Value) {
        if self.sections.is_empty() {
            self.sections.push(("Unit".to_string(), Vec::new()));
        }
        if let Some((_, entries)) = self.sections.last_mut() {
            entries.push((key.to_string(), value));
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, (name, entries)) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", name);
            for (key, value) in entries {
                let rendered = match value {
                    Value::Text(text) => text.clone(),
                    Value::Exec(line) => line.render(),
                };
                let _ = writeln!(out, "{}={}", key, rendered);
            }
        }
        out
    }
}

/// Run `systemctl` with the given arguments
pub fn systemctl(host: &dyn HostMemoryState, args: &[&str]) -> Result<String, HostError> {
    let mut cmd = vec!["systemctl"];
    cmd.extend_from_slice(args);
    host.run(&cmd)
}

/// Run `systemctl`, retrying up to `attempts` times with `delay` in between
pub fn systemctl_retry(
    host: &dyn HostMemoryState,
    args: &[&str],
    attempts: u32,
    delay: Duration,
) -> Result<(), HostError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match systemctl(host, args) {
            Ok(_) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(
                    "systemctl {}: attempt {}/{} failed: {}",
                    args.join(" "),
                    attempt,
                    attempts,
                    e
                );
                if !delay.is_zero() {
                    info!("Retrying in {} seconds...", delay.as_secs());
                    thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    #[test]
    fn test_quote() {
        assert_eq!(quote("/dev/zram0"), "/dev/zram0");
        assert_eq!(quote("-p"), "-p");
        assert_eq!(quote("a b"), "\"a b\"");
        assert_eq!(quote("50%"), "50%%");
        assert_eq!(quote("$HOME"), "$$HOME");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_render_unit() {
        let unit = UnitFile::new()
            .section("Unit")
            .entry("Description", "Test unit")
            .section("Service")
            .entry("Type", "oneshot")
            .exec("ExecStart", ExecLine::new("/bin/sh").arg("-c").arg("echo 1 > /tmp/x"))
            .section("Install")
            .entry("WantedBy", "multi-user.target");
        assert_eq!(
            unit.render(),
            "[Unit]\nDescription=Test unit\n\n\
             [Service]\nType=oneshot\nExecStart=/bin/sh -c \"echo 1 > /tmp/x\"\n\n\
             [Install]\nWantedBy=multi-user.target\n"
        );
    }

    #[test]
    fn test_entry_strips_newlines() {
        let unit = UnitFile::new().entry("Description", "a\nExecStart=/bin/evil");
        assert_eq!(unit.render(), "[Unit]\nDescription=a ExecStart=/bin/evil\n");
    }

    #[test]
    fn test_systemctl_retry_gives_up() {
        let host = FakeHost::new().failing("systemctl");
        let err = systemctl_retry(&host, &["enable", "x.service"], 3, Duration::ZERO);
        assert!(err.is_err());
        assert_eq!(host.commands().len(), 3);
    }

    #[test]
    fn test_systemctl_retry_first_success() {
        let host = FakeHost::new();
        systemctl_retry(&host, &["daemon-reload"], 5, Duration::ZERO).unwrap();
        assert_eq!(host.commands(), vec!["systemctl daemon-reload"]);
    }
}
