//! Unix permission strings.
//!
//! Artifacts carry their install permissions as text, either as a 4-digit
//! octal mode (`0755`) or as a 9-character symbolic string (`rwxr-xr-x`).

use serde::{Deserialize, Serialize};

/// Default permissions for executable artifact types.
pub const EXECUTABLE_DEFAULT: &str = "0755";

/// Default permissions for everything else.
pub const REGULAR_DEFAULT: &str = "0644";

/// A validated permission string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions(String);

impl Permissions {
    /// Parses a permission string, returning `None` if it is malformed.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        is_valid(value).then(|| Self(value.to_string()))
    }

    /// Returns the numeric mode (including setuid/setgid/sticky bits).
    #[must_use]
    pub fn mode(&self) -> u32 {
        mode_of(&self.0).unwrap_or(0)
    }

    /// Returns true if any execute bit is set.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.mode() & 0o111 != 0
    }

    /// Returns the permission string as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Permissions {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(format!("invalid permission string: {value:?}"))
        }
    }
}

impl From<Permissions> for String {
    fn from(value: Permissions) -> Self {
        value.0
    }
}

impl std::fmt::Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns true if `value` is a 4-digit octal or 9-character symbolic mode.
#[must_use]
pub fn is_valid(value: &str) -> bool {
    mode_of(value).is_some()
}

/// Converts a permission string to its numeric mode.
#[must_use]
pub fn mode_of(value: &str) -> Option<u32> {
    let bytes = value.as_bytes();
    match bytes.len() {
        4 if bytes.iter().all(|b| (b'0'..=b'7').contains(b)) => {
            u32::from_str_radix(value, 8).ok()
        }
        9 => symbolic_mode(bytes),
        _ => None,
    }
}

fn symbolic_mode(bytes: &[u8]) -> Option<u32> {
    let mut mode = 0u32;
    for (group, chunk) in bytes.chunks(3).enumerate() {
        let shift = 6 - 3 * group as u32;
        match chunk[0] {
            b'r' => mode |= 0o4 << shift,
            b'-' => {}
            _ => return None,
        }
        match chunk[1] {
            b'w' => mode |= 0o2 << shift,
            b'-' => {}
            _ => return None,
        }
        // Special bit for this group: setuid, setgid, sticky.
        let (special, lower, upper) = match group {
            0 => (0o4000, b's', b'S'),
            1 => (0o2000, b's', b'S'),
            _ => (0o1000, b't', b'T'),
        };
        match chunk[2] {
            b'x' => mode |= 0o1 << shift,
            b'-' => {}
            c if c == lower => mode |= special | (0o1 << shift),
            c if c == upper => mode |= special,
            _ => return None,
        }
    }
    Some(mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_octal_modes() {
        assert_eq!(mode_of("0755"), Some(0o755));
        assert_eq!(mode_of("4755"), Some(0o4755));
        assert_eq!(mode_of("0644"), Some(0o644));
        assert_eq!(mode_of("0855"), None);
        assert_eq!(mode_of("755"), None);
    }

    #[test]
    fn test_symbolic_modes() {
        assert_eq!(mode_of("rwxr-xr-x"), Some(0o755));
        assert_eq!(mode_of("rw-r--r--"), Some(0o644));
        assert_eq!(mode_of("rwsr-xr-x"), Some(0o4755));
        assert_eq!(mode_of("rwxrwxrwt"), Some(0o1777));
        assert_eq!(mode_of("rw-r-Sr--"), Some(0o2644));
        assert_eq!(mode_of("rwxr-xr-s"), None);
        assert_eq!(mode_of("rwxr-xr-"), None);
    }

    #[test]
    fn test_permissions_serde() {
        let perms: Permissions = serde_json::from_str("\"0700\"").unwrap();
        assert_eq!(perms.mode(), 0o700);
        assert!(perms.is_executable());
        assert!(serde_json::from_str::<Permissions>("\"0999\"").is_err());
    }
}
