use std::path::Path;

#[derive(Debug, Clone)]
pub struct FormatContext {
    pub allow_format: bool,
}

impl Default for FormatContext {
    fn default() -> Self {
        Self { allow_format: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    Allow,
    Deny(String),
}

/// Gate for the one irreversible step: putting a fresh filesystem on a target
/// that probed blank.
pub fn can_create_filesystem(ctx: &FormatContext, target: &Path) -> SafetyDecision {
    if !ctx.allow_format {
        return SafetyDecision::Deny(
            "filesystem creation disabled (disk.format_blank_drives = false)".to_string(),
        );
    }

    if !target.starts_with("/dev/") {
        return SafetyDecision::Deny(format!("{} is not a device node", target.display()));
    }

    let name = target
        .file_name()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.is_empty() || name.starts_with("loop") || name.starts_with("ram") {
        return SafetyDecision::Deny(format!("{} is a virtual device", target.display()));
    }

    SafetyDecision::Allow
}
