//! Argument validation run before any collaborator is called

use crate::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Characters that could break out of the remote script's quoting
const FORBIDDEN: &[char] = &[';', '&', '|', '$', '`', '(', ')', '<', '>', '\\', '"', '\''];

type Pattern = LazyLock<std::result::Result<Regex, regex::Error>>;

static HOSTNAME: Pattern =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]{1,63}(\.[A-Za-z0-9-]{1,63})*$"));

static GROUP: Pattern =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._()-]{1,90}$"));

static VM_NAME: Pattern =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$"));

fn matches(pattern: &Pattern, value: &str) -> Result<bool> {
    match pattern.as_ref() {
        Ok(re) => Ok(re.is_match(value)),
        Err(e) => Err(Error::InvalidArgument(format!("validation pattern: {}", e))),
    }
}

/// Validate the registration server hostname
///
/// The value ends up inside a shell script on every target, so anything that
/// is not a plain dotted hostname is rejected.
pub fn validate_server_hostname(value: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidServerHostname {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("hostname is empty"));
    }
    if let Some(c) = value.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(invalid(&format!("contains forbidden character '{}'", c)));
    }
    if value.contains("://") || value.contains('/') {
        return Err(invalid("expected a bare hostname, not a URL"));
    }
    if value.len() > 253 {
        return Err(invalid("hostname is longer than 253 characters"));
    }
    if !matches(&HOSTNAME, value)? {
        return Err(invalid(
            "expected alphanumeric or hyphen labels of at most 63 characters separated by single dots",
        ));
    }
    Ok(())
}

/// Validate an Azure resource group name
pub fn validate_group(value: &str) -> Result<()> {
    if !matches(&GROUP, value)? || value.ends_with('.') {
        return Err(Error::InvalidArgument(format!(
            "invalid resource group name '{}'",
            value
        )));
    }
    Ok(())
}

/// Validate a VM name, which also becomes a log file name
pub fn validate_vm_name(value: &str) -> Result<()> {
    if !matches(&VM_NAME, value)? {
        return Err(Error::InvalidArgument(format!("invalid VM name '{}'", value)));
    }
    Ok(())
}
