//! Firmware dialects for the supported controller families
//!
//! A dialect is an immutable policy value describing one firmware's
//! protocol quirks: which prompt to strip from received lines, how many
//! unacknowledged lines its input buffer holds, how it acknowledges and
//! reports errors, and which commands bring it to a safe state.
//!
//! Supported dialects:
//! - Generic: strict ping-pong, `ok` acknowledges
//! - Marlin: as Generic, errors reported as `ERROR:`
//! - Smoothie: `> ` console prompt, ten lines of pipelining

/// Supported firmware families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialectKind {
    /// Generic G-code firmware (default)
    #[default]
    Generic,
    /// Marlin 3D-printer firmware
    Marlin,
    /// Smoothieware
    Smoothie,
}

impl DialectKind {
    /// Look up a dialect by its configuration name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "generic" => Some(Self::Generic),
            "marlin" => Some(Self::Marlin),
            "smoothie" | "smoothieware" => Some(Self::Smoothie),
            _ => None,
        }
    }
}

impl std::fmt::Display for DialectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Marlin => write!(f, "marlin"),
            Self::Smoothie => write!(f, "smoothie"),
        }
    }
}

/// Protocol policy of one firmware family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareDialect {
    kind: DialectKind,
    prompt: String,
    buffer_depth: usize,
    stop_commands: Vec<String>,
    abort_commands: Vec<String>,
    ack_prefix: String,
    error_prefix: String,
}

impl FirmwareDialect {
    /// Dialect for generic firmware
    pub fn generic() -> Self {
        Self {
            kind: DialectKind::Generic,
            prompt: String::new(),
            buffer_depth: 1,
            stop_commands: vec!["M104 S0".to_string(), "M140 S0".to_string()],
            abort_commands: vec!["M112".to_string()],
            ack_prefix: "ok".to_string(),
            error_prefix: "!!".to_string(),
        }
    }

    /// Dialect for Marlin
    pub fn marlin() -> Self {
        Self {
            kind: DialectKind::Marlin,
            error_prefix: "ERROR:".to_string(),
            ..Self::generic()
        }
    }

    /// Dialect for Smoothieware, typically reached over its telnet console
    pub fn smoothie() -> Self {
        Self {
            kind: DialectKind::Smoothie,
            prompt: "> ".to_string(),
            buffer_depth: 10,
            ..Self::generic()
        }
    }

    /// Dialect for a known family
    pub fn for_kind(kind: DialectKind) -> Self {
        match kind {
            DialectKind::Generic => Self::generic(),
            DialectKind::Marlin => Self::marlin(),
            DialectKind::Smoothie => Self::smoothie(),
        }
    }

    /// Resolve a dialect by configuration name.
    ///
    /// Unknown names fall back to the generic dialect with a warning.
    pub fn resolve(name: &str) -> Self {
        match DialectKind::from_name(name) {
            Some(kind) => Self::for_kind(kind),
            None => {
                tracing::warn!(
                    "Firmware dialect '{}' not known, defaulting to generic",
                    name
                );
                Self::generic()
            }
        }
    }

    /// Override how many unacknowledged lines may be outstanding.
    /// Depths below one are raised to one.
    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = depth.max(1);
        self
    }

    pub fn kind(&self) -> DialectKind {
        self.kind
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Maximum count of sent but unacknowledged lines. Always at least one.
    pub fn buffer_depth(&self) -> usize {
        self.buffer_depth
    }

    /// Commands sent, in order, on a graceful stop
    pub fn stop_commands(&self) -> &[String] {
        &self.stop_commands
    }

    /// Commands sent, in order, on an emergency abort
    pub fn abort_commands(&self) -> &[String] {
        &self.abort_commands
    }

    /// Remove the prompt prefix from a received line, if present
    pub fn strip_prompt<'a>(&self, line: &'a str) -> &'a str {
        if self.prompt.is_empty() {
            return line;
        }
        line.strip_prefix(self.prompt.as_str()).unwrap_or(line)
    }

    /// Whether a received line acknowledges one sent line
    pub fn is_ack(&self, line: &str) -> bool {
        line.starts_with(self.ack_prefix.as_str())
    }

    /// Whether a received line reports an error or asks for a resend
    pub fn is_error(&self, line: &str) -> bool {
        line.starts_with(self.error_prefix.as_str())
    }

    /// Command telling the firmware which line number to expect next
    pub fn set_next_linenumber(&self, n: u64) -> String {
        match self.kind {
            DialectKind::Smoothie => format!("N{} M110", n),
            DialectKind::Generic | DialectKind::Marlin => format!("M110 N{}", n),
        }
    }
}

impl Default for FirmwareDialect {
    fn default() -> Self {
        Self::generic()
    }
}
