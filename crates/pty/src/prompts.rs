//! Heuristics for flagging PTY output a human needs to act on before the
//! agent can safely keep feeding the session automated input.

pub const PASSWORD_PROMPTS: &[&str] = &[
    "[sudo] password",
    "password:",
    "password for",
    "enter passphrase",
    "enter password",
    "authentication password",
];

pub const CONFIRM_PROMPTS: &[&str] = &[
    "[y/n]",
    "(y/n)",
    "[yes/no]",
    "(yes/no)",
    "continue? [",
    "proceed? [",
    "are you sure",
    "do you want to continue",
];

/// Classifies a chunk of decoded PTY output as a password or confirmation
/// prompt, grounded on `detect_prompt_type`.
pub fn detect_prompt_type(output: &str) -> Option<&'static str> {
    let lower = output.to_lowercase();
    if PASSWORD_PROMPTS.iter().any(|p| lower.contains(p)) {
        return Some("password");
    }
    if CONFIRM_PROMPTS.iter().any(|p| lower.contains(p)) {
        return Some("confirm");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sudo_password_prompt_case_insensitively() {
        assert_eq!(detect_prompt_type("[sudo] PASSWORD for root:"), Some("password"));
    }

    #[test]
    fn detects_yes_no_confirmation() {
        assert_eq!(detect_prompt_type("Continue? [Y/n] "), Some("confirm"));
    }

    #[test]
    fn plain_output_has_no_prompt_hint() {
        assert_eq!(detect_prompt_type("total 24\ndrwxr-xr-x 3 root root"), None);
    }
}
