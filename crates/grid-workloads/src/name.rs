//! Workload and network name rules.

use regex::Regex;

use crate::error::{WorkloadError, WorkloadsResult};

pub const MAX_NAME_LEN: usize = 36;

/// Names are non-empty, at most 36 characters of `[A-Za-z0-9_]`.
pub fn validate_name(name: &str) -> WorkloadsResult<()> {
    if name.is_empty() {
        return Err(WorkloadError::invalid("name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(WorkloadError::invalid(format!(
            "name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    let re = Regex::new(r"^[a-zA-Z0-9_]+$")?;
    if !re.is_match(name) {
        return Err(WorkloadError::invalid("unsupported character in workload name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert!(validate_name("vm_1").is_ok());
        assert_eq!(validate_name("").unwrap_err().to_string(), "name cannot be empty");
        assert_eq!(
            validate_name(&"a".repeat(37)).unwrap_err().to_string(),
            "name cannot exceed 36 characters"
        );
        assert!(validate_name(&"a".repeat(36)).is_ok());
        assert_eq!(
            validate_name("my-vm").unwrap_err().to_string(),
            "unsupported character in workload name"
        );
    }
}
