//! Environment sanitization for PTY children.
//!
//! Children inherit only an allow-listed subset of the parent environment
//! so stray credentials and tool-specific variables never leak into
//! assistant sessions. Terminal identity is forced so TUIs render
//! consistently.

use std::collections::HashMap;

/// Variables passed through verbatim when present.
const ALLOWED_KEYS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "LANG",
    "TERM",
    "COLORTERM",
    "DISPLAY",
    "WAYLAND_DISPLAY",
    "SYSTEMROOT",
    "SYSTEMDRIVE",
    "WINDIR",
    "APPDATA",
    "LOCALAPPDATA",
    "COMMONPROGRAMFILES",
    "TEMP",
    "TMP",
    "USERPROFILE",
    "HOMEDRIVE",
    "HOMEPATH",
    "NUMBER_OF_PROCESSORS",
    "PROCESSOR_ARCHITECTURE",
    "OS",
    "COMSPEC",
    "PSMODULEPATH",
];

/// Prefix families passed through (LC_ALL, XDG_DATA_HOME, WSLENV, …).
const ALLOWED_PREFIXES: &[&str] = &["LC_", "XDG_", "WSL", "PROGRAMFILES"];

fn is_allowed(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    ALLOWED_KEYS.contains(&upper.as_str())
        || ALLOWED_PREFIXES.iter().any(|p| upper.starts_with(p))
}

/// Build the child environment: parent vars overlaid with `overrides`,
/// filtered through the allow-list, then `TERM`/`COLORTERM` forced and
/// `LANG` defaulted.
pub fn sanitized_env(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = std::env::vars().collect();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }

    let mut out: HashMap<String, String> = merged
        .into_iter()
        .filter(|(k, _)| is_allowed(k))
        .collect();

    out.insert("TERM".into(), "xterm-256color".into());
    out.insert("COLORTERM".into(), "truecolor".into());
    out.entry("LANG".into())
        .or_insert_with(|| "en_US.UTF-8".into());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_keys_are_allow_listed() {
        let mut overrides = HashMap::new();
        overrides.insert("AWS_SECRET_ACCESS_KEY".to_string(), "hunter2".to_string());
        overrides.insert("PATH".to_string(), "/usr/bin".to_string());

        let env = sanitized_env(&overrides);
        for key in env.keys() {
            assert!(
                is_allowed(key) || matches!(key.as_str(), "TERM" | "COLORTERM" | "LANG"),
                "unexpected key leaked: {key}"
            );
        }
        assert!(!env.contains_key("AWS_SECRET_ACCESS_KEY"));
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
    }

    #[test]
    fn term_and_colorterm_are_forced() {
        let mut overrides = HashMap::new();
        overrides.insert("TERM".to_string(), "dumb".to_string());
        overrides.insert("COLORTERM".to_string(), "no".to_string());

        let env = sanitized_env(&overrides);
        assert_eq!(env.get("TERM").map(String::as_str), Some("xterm-256color"));
        assert_eq!(env.get("COLORTERM").map(String::as_str), Some("truecolor"));
    }

    #[test]
    fn lang_defaults_but_is_not_forced() {
        let mut overrides = HashMap::new();
        overrides.insert("LANG".to_string(), "de_DE.UTF-8".to_string());
        let env = sanitized_env(&overrides);
        assert_eq!(env.get("LANG").map(String::as_str), Some("de_DE.UTF-8"));
    }

    #[test]
    fn prefix_families_pass_through() {
        let mut overrides = HashMap::new();
        overrides.insert("LC_ALL".to_string(), "C".to_string());
        overrides.insert("XDG_DATA_HOME".to_string(), "/data".to_string());
        overrides.insert("WSLENV".to_string(), "x".to_string());
        overrides.insert("LD_PRELOAD".to_string(), "evil.so".to_string());

        let env = sanitized_env(&overrides);
        assert!(env.contains_key("LC_ALL"));
        assert!(env.contains_key("XDG_DATA_HOME"));
        assert!(env.contains_key("WSLENV"));
        assert!(!env.contains_key("LD_PRELOAD"));
    }

    #[test]
    fn allow_list_check_is_case_insensitive() {
        assert!(is_allowed("PSModulePath"));
        assert!(is_allowed("path"));
        assert!(!is_allowed("SSH_AUTH_SOCK"));
    }
}
