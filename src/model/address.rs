//! Author parsing for Usenet `From:` fields.

/// A parsed `From:` value.
///
/// # Examples
/// - `"Jan Kowalski <jan@example.pl>"` → `name = "Jan Kowalski"`, `address = "jan@example.pl"`
/// - `"jan@example.pl (Jan Kowalski)"` → `name = "Jan Kowalski"`, `address = "jan@example.pl"`
/// - `"jan@example.pl"` → `name = ""`, `address = "jan@example.pl"`
#[derive(Debug, Clone, serde::Serialize, PartialEq)]
pub struct Author {
    /// Human-readable name (may be empty).
    pub name: String,
    /// The bare address (`user@domain`).
    pub address: String,
}

impl Author {
    /// Parse a `From:` value.
    ///
    /// Supported formats:
    /// - `"user@domain"`
    /// - `"<user@domain>"`
    /// - `"Real Name <user@domain>"`
    /// - `"\"Name, Quoted\" <user@domain>"`
    /// - `"user@domain (Real Name)"` (RFC 1036 style)
    ///
    /// If parsing fails, the raw string is stored as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self {
                name: String::new(),
                address: String::new(),
            };
        }

        // "Real Name <address>" or "<address>"
        if let (Some(start), Some(end)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if end > start {
                return Self {
                    name: strip_quotes(&trimmed[..start]),
                    address: trimmed[start + 1..end].trim().to_string(),
                };
            }
        }

        // "address (Real Name)"
        if trimmed.ends_with(')') {
            if let Some(open) = trimmed.find('(') {
                let comment = &trimmed[open + 1..trimmed.len() - 1];
                return Self {
                    name: strip_quotes(comment),
                    address: trimmed[..open].trim().to_string(),
                };
            }
        }

        Self {
            name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// The name to show for this author: the real name if there is one,
    /// otherwise the address.
    pub fn real_name(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} <{}>", self.name, self.address)
        }
    }
}
