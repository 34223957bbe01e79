//! Command dispatcher
//!
//! Maps client commands onto device operations. Every command has the
//! same shape: it takes its argument vector and returns the response lines
//! or an error. Commands may be abbreviated to any unique prefix.

use cncd_communication::Device;
use cncd_core::{Error, MemoryStatusStore, OperationConflict, ProgressObserver, Result, StatusStore};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Command names and usage, in help order
pub const COMMANDS: &[(&str, &str)] = &[
    ("connect", "connect <handle>"),
    ("disconnect", "disconnect <handle>"),
    ("load", "load <handle> <filename>"),
    ("start", "start <handle> [filename]"),
    ("stop", "stop <handle>"),
    ("abort", "abort <handle>"),
    ("pause", "pause <handle>"),
    ("resume", "resume <handle>"),
    ("gcode", "gcode <handle> <line>"),
    ("devices", "devices"),
    ("data", "data [handle]"),
    ("progress", "progress <handle>"),
    ("help", "help [command]"),
];

/// Resolve a possibly abbreviated command name
pub fn resolve_command(name: &str) -> Result<&'static str> {
    if let Some((exact, _)) = COMMANDS.iter().find(|(cmd, _)| *cmd == name) {
        return Ok(*exact);
    }
    let matches: Vec<&'static str> = COMMANDS
        .iter()
        .map(|(cmd, _)| *cmd)
        .filter(|cmd| !name.is_empty() && cmd.starts_with(name))
        .collect();
    match matches.as_slice() {
        [only] => Ok(*only),
        [] => Err(Error::other(format!("Unknown command '{}'", name))),
        many => Err(Error::other(format!(
            "Ambiguous command '{}' ({})",
            name,
            many.join(", ")
        ))),
    }
}

fn usage_line(command: &str) -> String {
    let usage = COMMANDS
        .iter()
        .find(|(cmd, _)| *cmd == command)
        .map(|(_, usage)| *usage)
        .unwrap_or(command);
    format!("usage: {}", usage)
}

fn usage(command: &str) -> Error {
    Error::other(usage_line(command))
}

/// Split a request line into arguments. Single and double quotes group words.
pub fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        args.push(current);
    }
    args
}

/// Routes commands to the configured devices
pub struct Dispatcher {
    devices: BTreeMap<String, Device>,
    status: Arc<MemoryStatusStore>,
    progress: Arc<ProgressObserver>,
}

impl Dispatcher {
    pub fn new(
        devices: impl IntoIterator<Item = Device>,
        status: Arc<MemoryStatusStore>,
        progress: Arc<ProgressObserver>,
    ) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|device| (device.handle().to_string(), device))
                .collect(),
            status,
            progress,
        }
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device(&self, handle: &str) -> Result<&Device> {
        self.devices.get(handle).ok_or_else(|| {
            OperationConflict::UnknownDevice {
                device: handle.to_string(),
            }
            .into()
        })
    }

    /// Run one command
    pub async fn dispatch(&self, argv: &[String]) -> Result<Vec<String>> {
        let Some(name) = argv.first() else {
            return Err(Error::other("Empty command"));
        };
        let command = resolve_command(name)?;
        let args = &argv[1..];
        tracing::debug!("Dispatching {} {:?}", command, args);

        match command {
            "connect" => self.with_device(command, args, |d| async move { d.connect().await }).await,
            "disconnect" => {
                self.with_device(command, args, |d| async move { d.disconnect().await })
                    .await
            }
            "stop" => self.with_device(command, args, |d| async move { d.stop().await }).await,
            "abort" => self.with_device(command, args, |d| async move { d.abort().await }).await,
            "pause" => self.with_device(command, args, |d| async move { d.pause().await }).await,
            "resume" => self.with_device(command, args, |d| async move { d.resume().await }).await,
            "load" => match args {
                [handle, filename] => {
                    self.device(handle)?.select(filename);
                    Ok(Vec::new())
                }
                _ => Err(usage(command)),
            },
            "start" => match args {
                [handle] => self.device(handle)?.start_selected().await.map(|_| Vec::new()),
                [handle, filename] => self.device(handle)?.start(filename).await.map(|_| Vec::new()),
                _ => Err(usage(command)),
            },
            "gcode" => match args {
                [handle, line @ ..] if !line.is_empty() => {
                    self.device(handle)?.inject(&line.join(" ")).await?;
                    Ok(Vec::new())
                }
                _ => Err(usage(command)),
            },
            "devices" => Ok(self
                .devices
                .values()
                .map(|d| {
                    format!("{} {} {} {}", d.handle(), d.state(), d.port(), d.dialect().kind())
                })
                .collect()),
            "data" => match args {
                [] => Ok(self.devices.keys().flat_map(|h| self.data_lines(h)).collect()),
                [handle] => {
                    self.device(handle)?;
                    Ok(self.data_lines(handle))
                }
                _ => Err(usage(command)),
            },
            "progress" => match args {
                [handle] => {
                    self.device(handle)?;
                    let progress = self.progress.progress(handle);
                    Ok(vec![format!("{} {}", progress.progress, progress.total)])
                }
                _ => Err(usage(command)),
            },
            "help" => match args {
                [] => Ok(COMMANDS.iter().map(|(_, usage)| usage.to_string()).collect()),
                [name] => Ok(vec![usage_line(resolve_command(name)?)]),
                _ => Err(usage(command)),
            },
            _ => Err(Error::other(format!("Unknown command '{}'", command))),
        }
    }

    async fn with_device<'a, F, Fut>(
        &'a self,
        command: &str,
        args: &[String],
        op: F,
    ) -> Result<Vec<String>>
    where
        F: FnOnce(&'a Device) -> Fut,
        Fut: std::future::Future<Output = Result<()>> + 'a,
    {
        match args {
            [handle] => {
                op(self.device(handle)?).await?;
                Ok(Vec::new())
            }
            _ => Err(usage(command)),
        }
    }

    fn data_lines(&self, handle: &str) -> Vec<String> {
        self.status
            .snapshot(handle)
            .into_iter()
            .map(|(key, value)| format!("{} {} {}", handle, key, value))
            .collect()
    }

    /// Disconnect every connected device
    pub async fn shutdown(&self) {
        for device in self.devices.values() {
            if device.state().is_connected() {
                if let Err(e) = device.disconnect().await {
                    tracing::warn!("Disconnecting {} failed: {}", device.handle(), e);
                }
            }
        }
    }
}
